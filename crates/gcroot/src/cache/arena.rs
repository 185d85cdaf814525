//! Back-Pointer Arena - One Parent Per Reached Object
//!
//! Dense per-segment arrays indexed by slot, holding the address of the
//! object that first discovered each slot's object:
//! ```text
//! slot:    0        1        2        3       ...
//!        ┌────────┬────────┬────────┬────────┐
//! parent │ 0      │ 0x1000 │ 0x1000 │ 0x1010 │
//!        └────────┴────────┴────────┴────────┘
//!          root     child    child    grandchild
//!          object
//! ```
//! A stored 0 marks a root object (the chain ends there). The arena does
//! not know which slots are populated; callers pair it with the `reached`
//! set and only read parents of members.

use crate::heap::{Address, NULL_ADDRESS};
use crate::object_set::segment::{LazyWords, SegmentMap};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Arena words per lazily allocated chunk (1 << 12 words = 32KB)
const ARENA_CHUNK_SHIFT: u32 = 12;

pub(crate) struct BackPointerArena {
    map: Arc<SegmentMap>,
    parents: Box<[LazyWords]>,
    /// Parents of objects outside every segment
    overflow: Mutex<FxHashMap<Address, Address>>,
}

impl BackPointerArena {
    pub(crate) fn new(map: Arc<SegmentMap>) -> Self {
        let parents = (0..map.len())
            .map(|i| LazyWords::new(map.slot_count(i), ARENA_CHUNK_SHIFT))
            .collect();
        Self {
            map,
            parents,
            overflow: Mutex::new(FxHashMap::default()),
        }
    }

    /// Record `parent` as the discoverer of `child`
    ///
    /// Called once per child, by whoever won `try_add` for it.
    pub(crate) fn record(&self, child: Address, parent: Address) {
        match self.map.locate(child) {
            Some((segment, slot)) => {
                self.parents[segment]
                    .get_or_alloc(slot)
                    .store(parent, Ordering::Release);
            },
            None => {
                self.overflow.lock().insert(child, parent);
            },
        }
    }

    /// Stored parent of `child`; `NULL_ADDRESS` for root objects and for
    /// slots never recorded
    pub(crate) fn parent(&self, child: Address) -> Address {
        match self.map.locate(child) {
            Some((segment, slot)) => self.parents[segment]
                .get(slot)
                .map(|w| w.load(Ordering::Acquire))
                .unwrap_or(NULL_ADDRESS),
            None => self
                .overflow
                .lock()
                .get(&child)
                .copied()
                .unwrap_or(NULL_ADDRESS),
        }
    }

    pub(crate) fn allocated_bytes(&self) -> usize {
        self.parents.iter().map(|p| p.allocated_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapSegment;

    fn arena() -> BackPointerArena {
        BackPointerArena::new(Arc::new(SegmentMap::new(vec![HeapSegment::new(
            0x1000, 0x9000,
        )])))
    }

    #[test]
    fn test_record_and_read() {
        let arena = arena();
        arena.record(0x1000, NULL_ADDRESS);
        arena.record(0x1010, 0x1000);
        arena.record(0x8ff8, 0x1010);

        assert_eq!(arena.parent(0x1000), NULL_ADDRESS);
        assert_eq!(arena.parent(0x1010), 0x1000);
        assert_eq!(arena.parent(0x8ff8), 0x1010);
        assert_eq!(arena.parent(0x2000), NULL_ADDRESS);
    }

    #[test]
    fn test_foreign_addresses_use_overflow() {
        let arena = arena();
        arena.record(0xdead_0000, 0x1000);
        arena.record(0x1003, 0x1000);
        assert_eq!(arena.parent(0xdead_0000), 0x1000);
        assert_eq!(arena.parent(0x1003), 0x1000);
        assert_eq!(arena.allocated_bytes(), 0);
    }
}
