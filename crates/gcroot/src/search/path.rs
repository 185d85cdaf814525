//! Paths - Results of Root and Path Searches

use crate::heap::{Address, HeapGraphView, ObjectHandle, RootRecord};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;

/// Non-empty chain of objects, each referencing the next
///
/// The first element is the source (or root object), the last the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectPath {
    objects: Vec<ObjectHandle>,
}

impl ObjectPath {
    /// Resolve types for a non-empty address chain
    pub(crate) fn resolve<H: HeapGraphView + ?Sized>(heap: &H, addresses: &[Address]) -> Self {
        debug_assert!(!addresses.is_empty());
        Self {
            objects: addresses
                .iter()
                .map(|&address| ObjectHandle::resolve(heap, address))
                .collect(),
        }
    }

    /// Build a path from handles; `None` if `objects` is empty
    pub fn from_handles(objects: Vec<ObjectHandle>) -> Option<Self> {
        if objects.is_empty() {
            None
        } else {
            Some(Self { objects })
        }
    }

    pub fn source(&self) -> &ObjectHandle {
        &self.objects[0]
    }

    pub fn target(&self) -> &ObjectHandle {
        &self.objects[self.objects.len() - 1]
    }

    /// Number of objects, source and target included
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ObjectHandle> {
        self.objects.iter()
    }

    pub fn as_slice(&self) -> &[ObjectHandle] {
        &self.objects
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.objects.iter().map(|o| o.address).collect()
    }

    /// Check that every object directly references the next one in `heap`
    pub fn is_valid_in<H: HeapGraphView + ?Sized>(&self, heap: &H) -> bool {
        self.objects.windows(2).all(|pair| {
            let mut found = false;
            heap.enumerate_object_references(pair[0].address, &mut |reference| {
                found |= reference.address == pair[1].address;
            });
            found
        })
    }
}

impl<'p> IntoIterator for &'p ObjectPath {
    type Item = &'p ObjectHandle;
    type IntoIter = std::slice::Iter<'p, ObjectHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.iter()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, object) in self.objects.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", object)?;
        }
        Ok(())
    }
}

/// A root together with the path from its object to the target
#[derive(Debug, Clone, Serialize)]
pub struct RootPath {
    pub root: RootRecord,
    pub path: ObjectPath,
}

impl fmt::Display for RootPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.root, self.path)
    }
}

/// Objects already proven to reach the target, with their next hop
///
/// Shared by every walk of one query. Entries are inserted back to front
/// and never overwritten, so following next hops always ends at the target.
pub(crate) struct KnownPaths {
    target: Address,
    next: RwLock<FxHashMap<Address, Address>>,
}

impl KnownPaths {
    pub(crate) fn new(target: Address) -> Self {
        Self {
            target,
            next: RwLock::new(FxHashMap::default()),
        }
    }

    pub(crate) fn target(&self) -> Address {
        self.target
    }

    #[inline]
    pub(crate) fn is_known(&self, address: Address) -> bool {
        address == self.target || self.next.read().contains_key(&address)
    }

    /// Remember every hop of `path`, which must end at the target
    pub(crate) fn record(&self, path: &[Address]) {
        debug_assert_eq!(path.last(), Some(&self.target));
        let mut next = self.next.write();
        for pair in path.windows(2).rev() {
            next.entry(pair[0]).or_insert(pair[1]);
        }
    }

    /// Remembered path from `from` to the target
    pub(crate) fn suffix(&self, from: Address) -> Option<Vec<Address>> {
        let next = self.next.read();
        let mut path = vec![from];
        let mut current = from;
        while current != self.target {
            if path.len() > next.len() + 1 {
                return None;
            }
            current = *next.get(&current)?;
            path.push(current);
        }
        Some(path)
    }
}

/// Cut loops out of a stitched path
///
/// When an address repeats, everything after its first occurrence up to
/// the repeat is dropped. Edges stay valid: the element following the
/// repeat was referenced by that same address.
pub(crate) fn trim_cycles(path: Vec<Address>) -> Vec<Address> {
    let mut out: Vec<Address> = Vec::with_capacity(path.len());
    let mut position: FxHashMap<Address, usize> = FxHashMap::default();
    for address in path {
        match position.get(&address) {
            Some(&i) => {
                for removed in out.drain(i + 1..) {
                    position.remove(&removed);
                }
            },
            None => {
                position.insert(address, out.len());
                out.push(address);
            },
        }
    }
    out
}
