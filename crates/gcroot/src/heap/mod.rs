//! Heap Module - The Heap Graph Boundary
//!
//! gcroot never reads target memory itself. Everything it knows about the
//! heap comes through [`HeapGraphView`], implemented by whatever reconstructs
//! the managed heap (a dump reader, a live-process reader, or the in-memory
//! [`HeapSnapshot`](snapshot::HeapSnapshot)).
//!
//! Addresses are sparse:
//! ```text
//! ┌──────────────┐          ┌──────────────────┐          ┌───────┐
//! │  segment 0   │   gap    │    segment 1     │   gap    │ seg 2 │
//! │ 0x1000_0000  │ ........ │  0x7f00_0000_00  │ ........ │  ...  │
//! └──────────────┘          └──────────────────┘          └───────┘
//! ```
//! Segment bounds come from the view up front so address sets and the
//! reachability cache can index storage by segment-relative offset.

pub mod root;
pub mod snapshot;

pub use root::{AppDomainRef, RootKind, RootRecord, StackFrame, ThreadRef};
pub use snapshot::{HeapSnapshot, HeapSnapshotBuilder};

use crate::logging::{log_event, SearchEvent};
use crate::stats::SearchStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Location of an object in the target process
pub type Address = u64;

/// Never a live object; "no object"
pub const NULL_ADDRESS: Address = 0;

/// Contiguous address range `[start, end)` managed as one allocation arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapSegment {
    pub start: Address,
    pub end: Address,
}

impl HeapSegment {
    pub fn new(start: Address, end: Address) -> Self {
        Self { start, end }
    }

    /// Check if `address` lies inside the segment
    #[inline]
    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && address < self.end
    }

    /// Segment length in bytes
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runtime type of an object, as resolved by the heap view
///
/// `id` is allocated by the view that produced the type (method table
/// address for a real runtime); two types from the same view are equal iff
/// their ids are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectType {
    pub id: u64,
    pub name: Arc<str>,
}

impl ObjectType {
    pub fn new(id: u64, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An object address with its type, when known
///
/// Equality and hashing use the address only: two handles to the same
/// address are the same object even if resolved independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectHandle {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<ObjectType>,
}

impl ObjectHandle {
    /// Handle with an unresolved type
    pub fn new(address: Address) -> Self {
        Self {
            address,
            object_type: None,
        }
    }

    pub fn with_type(address: Address, object_type: ObjectType) -> Self {
        Self {
            address,
            object_type: Some(object_type),
        }
    }

    /// Resolve the handle for `address` through `heap`
    pub fn resolve<H: HeapGraphView + ?Sized>(heap: &H, address: Address) -> Self {
        Self {
            address,
            object_type: heap.resolve_type(address),
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        self.object_type.as_ref().map(|t| &*t.name)
    }

    pub fn is_null(&self) -> bool {
        self.address == NULL_ADDRESS
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ObjectHandle {}

impl Hash for ObjectHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_name() {
            Some(name) => write!(f, "{:#x} {}", self.address, name),
            None => write!(f, "{:#x} <unknown type>", self.address),
        }
    }
}

/// One outgoing edge of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectReference {
    /// Referenced object
    pub address: Address,
    /// Offset of the referencing field inside the source object
    pub field_offset: u64,
}

/// How the view discovers thread-stack roots
///
/// The search treats `LocalVar` roots identically under both policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackwalkPolicy {
    /// Walk stacks precisely using GC info
    #[default]
    Exact,
    /// Skip the precise walk; stack roots are approximate
    SkipStack,
}

/// Read-only view of a managed heap
///
/// Implementations must be callable from several threads at once:
/// `build_cache` and parallel queries enumerate references concurrently.
/// Memory read failures are the implementation's problem; report such an
/// object as having no references.
pub trait HeapGraphView: Send + Sync {
    /// Heap segments, used to size address sets and the cache
    fn segments(&self) -> Vec<HeapSegment>;

    /// All GC roots currently known
    fn enumerate_roots(&self) -> Box<dyn Iterator<Item = RootRecord> + '_>;

    /// Visit every outgoing reference of the object at `address`
    fn enumerate_object_references(&self, address: Address, visit: &mut dyn FnMut(ObjectReference));

    /// Runtime type of the object at `address`, `None` if it cannot be resolved
    fn resolve_type(&self, address: Address) -> Option<ObjectType>;

    /// Policy used to discover stack roots
    fn stackwalk_policy(&self) -> StackwalkPolicy {
        StackwalkPolicy::Exact
    }
}

impl<T: HeapGraphView + ?Sized> HeapGraphView for Arc<T> {
    fn segments(&self) -> Vec<HeapSegment> {
        (**self).segments()
    }

    fn enumerate_roots(&self) -> Box<dyn Iterator<Item = RootRecord> + '_> {
        (**self).enumerate_roots()
    }

    fn enumerate_object_references(&self, address: Address, visit: &mut dyn FnMut(ObjectReference)) {
        (**self).enumerate_object_references(address, visit)
    }

    fn resolve_type(&self, address: Address) -> Option<ObjectType> {
        (**self).resolve_type(address)
    }

    fn stackwalk_policy(&self) -> StackwalkPolicy {
        (**self).stackwalk_policy()
    }
}

/// Collect the non-null referents of `address` into `out`
///
/// `out` is cleared first. Objects whose type cannot be resolved are leaves:
/// nothing is collected for them and the return value is false.
pub(crate) fn expand_object<H: HeapGraphView + ?Sized>(
    heap: &H,
    address: Address,
    out: &mut Vec<Address>,
) -> bool {
    out.clear();
    if heap.resolve_type(address).is_none() {
        log::trace!("Object {:#x} has no resolvable type, treating as leaf", address);
        return false;
    }
    heap.enumerate_object_references(address, &mut |reference| {
        if reference.address != NULL_ADDRESS {
            out.push(reference.address);
        }
    });
    true
}

/// Reference expansion plus the bookkeeping every traversal shares
pub(crate) struct Expander<'a, H: ?Sized> {
    heap: &'a H,
    stats: &'a SearchStats,
    verbose: bool,
}

impl<H: ?Sized> Clone for Expander<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: ?Sized> Copy for Expander<'_, H> {}

impl<'a, H: HeapGraphView + ?Sized> Expander<'a, H> {
    pub(crate) fn new(heap: &'a H, stats: &'a SearchStats, verbose: bool) -> Self {
        Self {
            heap,
            stats,
            verbose,
        }
    }

    pub(crate) fn heap(&self) -> &'a H {
        self.heap
    }

    /// [`expand_object`] with visit counting and unresolved-object events
    #[inline]
    pub(crate) fn expand(&self, address: Address, out: &mut Vec<Address>) -> bool {
        if expand_object(self.heap, address, out) {
            self.stats.record_visit(out.len());
            true
        } else {
            self.stats.record_unresolved();
            if self.verbose {
                log_event(SearchEvent::UnresolvedObject { address });
            }
            false
        }
    }
}
