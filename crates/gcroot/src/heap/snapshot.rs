//! Heap Snapshot - In-Memory Heap Graph
//!
//! A [`HeapGraphView`] over an explicit list of segments, objects and roots.
//! Useful for offline analysis of an exported heap and as the fixture every
//! test builds on.
//!
//! JSON layout:
//! ```json
//! {
//!   "segments": [{ "start": 4096, "end": 8192 }],
//!   "objects": [
//!     { "address": 4096, "type_name": "Node", "references": [{ "address": 4112, "offset": 8 }] },
//!     { "address": 4112, "type_name": "Leaf" }
//!   ],
//!   "roots": [
//!     { "address": 16, "object": { "address": 4096 }, "kind": "static_var", "name": "Program.s_root" }
//!   ]
//! }
//! ```
//!
//! References to addresses with no object record are kept: they model the
//! dangling pointers a corrupt dump produces and resolve to no type.

use super::{
    Address, HeapGraphView, HeapSegment, ObjectHandle, ObjectReference, ObjectType, RootKind,
    RootRecord, StackwalkPolicy, ThreadRef, NULL_ADDRESS,
};
use crate::error::{GcRootError, Result};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Base of the synthetic slot addresses the builder hands out
const SYNTHETIC_SLOT_BASE: Address = 0x7ff0_0000_0000;

/// Pointer size in the target process
const POINTER_SIZE: u64 = 8;

/// Outgoing reference of a snapshot object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReference {
    pub address: Address,
    #[serde(default)]
    pub offset: u64,
}

/// Object record in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotObject {
    pub address: Address,
    pub type_name: String,
    #[serde(default)]
    pub references: Vec<SnapshotReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SnapshotData {
    #[serde(default)]
    segments: Vec<HeapSegment>,
    #[serde(default)]
    objects: Vec<SnapshotObject>,
    #[serde(default)]
    roots: Vec<RootRecord>,
    #[serde(default)]
    stackwalk: StackwalkPolicy,
}

/// In-memory heap graph
#[derive(Debug)]
pub struct HeapSnapshot {
    data: SnapshotData,
    /// Type per object, parallel to `data.objects`
    types: Vec<ObjectType>,
    index: FxHashMap<Address, usize>,
}

impl HeapSnapshot {
    fn from_data(mut data: SnapshotData) -> Result<Self> {
        data.segments.sort_by_key(|s| s.start);
        for segment in &data.segments {
            if segment.start >= segment.end {
                return Err(GcRootError::Snapshot(format!(
                    "empty or inverted segment {:#x}..{:#x}",
                    segment.start, segment.end
                )));
            }
        }
        for pair in data.segments.windows(2) {
            if pair[0].end > pair[1].start {
                return Err(GcRootError::Snapshot(format!(
                    "segments {:#x}..{:#x} and {:#x}..{:#x} overlap",
                    pair[0].start, pair[0].end, pair[1].start, pair[1].end
                )));
            }
        }

        // Type ids are allocated per snapshot, in first-seen order.
        let mut interned: IndexMap<String, ObjectType> = IndexMap::new();
        let mut types = Vec::with_capacity(data.objects.len());
        let mut index = FxHashMap::default();
        index.reserve(data.objects.len());

        for (i, object) in data.objects.iter().enumerate() {
            if object.address == NULL_ADDRESS {
                return Err(GcRootError::Snapshot(
                    "object at null address".to_string(),
                ));
            }
            if index.insert(object.address, i).is_some() {
                return Err(GcRootError::Snapshot(format!(
                    "duplicate object at {:#x}",
                    object.address
                )));
            }
            let next_id = interned.len() as u64 + 1;
            let object_type = interned
                .entry(object.type_name.clone())
                .or_insert_with(|| ObjectType::new(next_id, object.type_name.as_str()))
                .clone();
            types.push(object_type);
        }

        log::debug!(
            "Loaded heap snapshot: {} segments, {} objects, {} types, {} roots",
            data.segments.len(),
            data.objects.len(),
            interned.len(),
            data.roots.len()
        );

        Ok(Self { data, types, index })
    }

    /// Parse a snapshot from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_slice(json.as_bytes())
    }

    /// Parse a snapshot from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let data: SnapshotData = serde_json::from_slice(bytes)?;
        Self::from_data(data)
    }

    /// Open a JSON snapshot file through a read-only memory map
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(GcRootError::Snapshot(format!(
                "{} is empty",
                path.display()
            )));
        }
        // SAFETY: the map is read-only and dropped before this function
        // returns; the snapshot owns parsed copies of everything it needs.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Self::from_slice(&map)
    }

    /// Serialize the snapshot back to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.data)?)
    }

    pub fn object_count(&self) -> usize {
        self.data.objects.len()
    }

    pub fn root_count(&self) -> usize {
        self.data.roots.len()
    }

    /// Check if an object record exists at `address`
    pub fn contains_object(&self, address: Address) -> bool {
        self.index.contains_key(&address)
    }

    /// Object addresses in insertion order
    pub fn object_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.data.objects.iter().map(|o| o.address)
    }
}

impl HeapGraphView for HeapSnapshot {
    fn segments(&self) -> Vec<HeapSegment> {
        self.data.segments.clone()
    }

    fn enumerate_roots(&self) -> Box<dyn Iterator<Item = RootRecord> + '_> {
        Box::new(self.data.roots.iter().map(move |root| {
            let mut root = root.clone();
            if root.object.object_type.is_none() {
                root.object.object_type = self.resolve_type(root.object.address);
            }
            root
        }))
    }

    fn enumerate_object_references(&self, address: Address, visit: &mut dyn FnMut(ObjectReference)) {
        if let Some(&i) = self.index.get(&address) {
            for reference in &self.data.objects[i].references {
                visit(ObjectReference {
                    address: reference.address,
                    field_offset: reference.offset,
                });
            }
        }
    }

    fn resolve_type(&self, address: Address) -> Option<ObjectType> {
        self.index.get(&address).map(|&i| self.types[i].clone())
    }

    fn stackwalk_policy(&self) -> StackwalkPolicy {
        self.data.stackwalk
    }
}

/// Builder for [`HeapSnapshot`]
///
/// ```rust
/// use gcroot::heap::HeapSnapshotBuilder;
///
/// let heap = HeapSnapshotBuilder::new()
///     .segment(0x1000, 0x2000)
///     .object(0x1000, "Parent", &[0x1020])
///     .object(0x1020, "Child", &[])
///     .static_root("Program.s_parent", 0x1000)
///     .build()
///     .unwrap();
/// assert_eq!(heap.object_count(), 2);
/// ```
#[derive(Debug, Default)]
pub struct HeapSnapshotBuilder {
    data: SnapshotData,
    next_slot: Address,
}

impl HeapSnapshotBuilder {
    pub fn new() -> Self {
        Self {
            data: SnapshotData::default(),
            next_slot: SYNTHETIC_SLOT_BASE,
        }
    }

    pub fn segment(mut self, start: Address, end: Address) -> Self {
        self.data.segments.push(HeapSegment::new(start, end));
        self
    }

    /// Add an object whose references sit in consecutive pointer fields
    pub fn object(self, address: Address, type_name: &str, references: &[Address]) -> Self {
        let with_offsets: Vec<(Address, u64)> = references
            .iter()
            .enumerate()
            .map(|(i, &r)| (r, (i as u64 + 1) * POINTER_SIZE))
            .collect();
        self.object_with_offsets(address, type_name, &with_offsets)
    }

    /// Add an object with explicit `(referent, field_offset)` pairs
    pub fn object_with_offsets(mut self, address: Address, type_name: &str, references: &[(Address, u64)]) -> Self {
        self.data.objects.push(SnapshotObject {
            address,
            type_name: type_name.to_string(),
            references: references
                .iter()
                .map(|&(address, offset)| SnapshotReference { address, offset })
                .collect(),
        });
        self
    }

    /// Add a fully described root
    pub fn root(mut self, root: RootRecord) -> Self {
        self.data.roots.push(root);
        self
    }

    /// Add a root of `kind` in a fresh synthetic slot
    pub fn root_of_kind(mut self, kind: RootKind, name: &str, object: Address) -> Self {
        let slot = self.allocate_slot();
        self.data
            .roots
            .push(RootRecord::new(slot, ObjectHandle::new(object), kind, name));
        self
    }

    pub fn static_root(self, name: &str, object: Address) -> Self {
        self.root_of_kind(RootKind::StaticVar, name, object)
    }

    pub fn pinned_static_root(mut self, name: &str, object: Address) -> Self {
        let slot = self.allocate_slot();
        self.data.roots.push(
            RootRecord::new(slot, ObjectHandle::new(object), RootKind::StaticVar, name)
                .with_pinned(true),
        );
        self
    }

    pub fn local_root(mut self, thread: ThreadRef, kind: RootKind, name: &str, object: Address) -> Self {
        let slot = self.allocate_slot();
        self.data.roots.push(
            RootRecord::new(slot, ObjectHandle::new(object), kind, name).with_thread(thread),
        );
        self
    }

    pub fn stackwalk(mut self, policy: StackwalkPolicy) -> Self {
        self.data.stackwalk = policy;
        self
    }

    pub fn build(self) -> Result<HeapSnapshot> {
        HeapSnapshot::from_data(self.data)
    }

    /// Build and wrap in an `Arc`, ready for `RootSearch::new`
    pub fn build_shared(self) -> Result<Arc<HeapSnapshot>> {
        self.build().map(Arc::new)
    }

    fn allocate_slot(&mut self) -> Address {
        let slot = self.next_slot;
        self.next_slot += POINTER_SIZE;
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> HeapSnapshot {
        HeapSnapshotBuilder::new()
            .segment(0x1000, 0x2000)
            .object(0x1000, "Parent", &[0x1020, 0x1040])
            .object(0x1020, "Child", &[])
            .object(0x1040, "Child", &[0x1000])
            .static_root("s_parent", 0x1000)
            .build()
            .unwrap()
    }

    #[test]
    fn test_types_are_interned_per_snapshot() {
        let heap = small_heap();
        let a = heap.resolve_type(0x1020).unwrap();
        let b = heap.resolve_type(0x1040).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, heap.resolve_type(0x1000).unwrap());
        assert!(heap.resolve_type(0x1060).is_none());
    }

    #[test]
    fn test_reference_offsets() {
        let heap = small_heap();
        let mut refs = Vec::new();
        heap.enumerate_object_references(0x1000, &mut |r| refs.push(r));
        assert_eq!(
            refs,
            vec![
                ObjectReference { address: 0x1020, field_offset: 8 },
                ObjectReference { address: 0x1040, field_offset: 16 },
            ]
        );
    }

    #[test]
    fn test_roots_get_resolved_types() {
        let heap = small_heap();
        let roots: Vec<_> = heap.enumerate_roots().collect();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].object.type_name(), Some("Parent"));
        assert_eq!(roots[0].address, SYNTHETIC_SLOT_BASE);
    }

    #[test]
    fn test_duplicate_object_rejected() {
        let result = HeapSnapshotBuilder::new()
            .object(0x1000, "A", &[])
            .object(0x1000, "B", &[])
            .build();
        assert!(matches!(result, Err(GcRootError::Snapshot(_))));
    }

    #[test]
    fn test_overlapping_segments_rejected() {
        let result = HeapSnapshotBuilder::new()
            .segment(0x1000, 0x3000)
            .segment(0x2000, 0x4000)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let heap = small_heap();
        let json = heap.to_json().unwrap();
        let back = HeapSnapshot::from_json(&json).unwrap();
        assert_eq!(back.object_count(), 3);
        assert_eq!(back.root_count(), 1);
        assert!(back.contains_object(0x1040));
    }
}
