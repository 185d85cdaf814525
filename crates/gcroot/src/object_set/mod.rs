//! Object Set - Visited Tracking for Heap Traversals
//!
//! [`AddressSet`] is the "already seen" marker of every walk gcroot does.
//! One bit per 8-byte slot, one bitmap per heap segment:
//! ```text
//! Segment: 0x1000_0000 .. 0x1040_0000 (4MB)
//! Granularity: 8 bytes per bit
//! Bitmap: 4MB / 8 = 524,288 bits = 64KB, allocated in 8KB chunks on demand
//!
//! Object at 0x1000_1040:
//! - Offset: 0x1040
//! - Bit index: 0x1040 / 8 = 520
//! - Word index: 520 / 64 = 8
//! - Bit offset: 520 % 64 = 8
//! ```
//! Addresses outside every segment, or not pointer-aligned, go to a small
//! overflow table so the set is total over `u64`.
//!
//! All operations take `&self` and are safe to call from many threads.
//! `try_add` is linearizable per address: of any number of concurrent
//! callers for the same address exactly one sees `true`.

pub(crate) mod segment;

use crate::heap::{Address, HeapGraphView, HeapSegment};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use segment::{LazyWords, SegmentMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bitmap words per lazily allocated chunk (1 << 10 words = 64K slots)
const BITMAP_CHUNK_SHIFT: u32 = 10;

/// Segment-partitioned set of object addresses
pub struct AddressSet {
    map: Arc<SegmentMap>,
    bitmaps: Box<[LazyWords]>,
    overflow: Mutex<FxHashSet<Address>>,
    count: AtomicUsize,
}

/// Name used by callers coming from heap-analysis tooling
pub type ObjectSet = AddressSet;

impl AddressSet {
    /// Create an empty set indexed by `segments`
    pub fn new(segments: &[HeapSegment]) -> Self {
        Self::with_map(Arc::new(SegmentMap::new(segments.to_vec())))
    }

    /// Create an empty set indexed by the segments of `heap`
    pub fn for_heap<H: HeapGraphView + ?Sized>(heap: &H) -> Self {
        Self::new(&heap.segments())
    }

    pub(crate) fn with_map(map: Arc<SegmentMap>) -> Self {
        let bitmaps = (0..map.len())
            .map(|i| LazyWords::new(map.slot_count(i).div_ceil(64), BITMAP_CHUNK_SHIFT))
            .collect();
        Self {
            map,
            bitmaps,
            overflow: Mutex::new(FxHashSet::default()),
            count: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn bit(slot: u64) -> (u64, u64) {
        (slot / 64, 1u64 << (slot % 64))
    }

    /// Check if `address` is in the set
    #[inline]
    pub fn contains(&self, address: Address) -> bool {
        match self.map.locate(address) {
            Some((segment, slot)) => {
                let (word, mask) = Self::bit(slot);
                self.bitmaps[segment]
                    .get(word)
                    .map(|w| w.load(Ordering::Acquire) & mask != 0)
                    .unwrap_or(false)
            },
            None => self.overflow.lock().contains(&address),
        }
    }

    /// Insert `address`; no-op if already present
    #[inline]
    pub fn add(&self, address: Address) {
        self.try_add(address);
    }

    /// Insert `address` and report whether this call inserted it
    #[inline]
    pub fn try_add(&self, address: Address) -> bool {
        let inserted = match self.map.locate(address) {
            Some((segment, slot)) => {
                let (word, mask) = Self::bit(slot);
                let prev = self.bitmaps[segment]
                    .get_or_alloc(word)
                    .fetch_or(mask, Ordering::AcqRel);
                prev & mask == 0
            },
            None => self.overflow.lock().insert(address),
        };
        if inserted {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Remove `address`; returns whether it was present
    pub fn remove(&self, address: Address) -> bool {
        let removed = match self.map.locate(address) {
            Some((segment, slot)) => {
                let (word, mask) = Self::bit(slot);
                match self.bitmaps[segment].get(word) {
                    Some(w) => w.fetch_and(!mask, Ordering::AcqRel) & mask != 0,
                    None => false,
                }
            },
            None => self.overflow.lock().remove(&address),
        };
        if removed {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Number of addresses in the set
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything and release the bitmap chunks
    pub fn clear(&mut self) {
        let map = Arc::clone(&self.map);
        *self = Self::with_map(map);
    }

    /// Collect the members, segment addresses first in ascending order,
    /// then overflow addresses in ascending order
    pub fn to_vec(&self) -> Vec<Address> {
        let mut out = Vec::with_capacity(self.len());
        for (segment, bitmap) in self.bitmaps.iter().enumerate() {
            for (word_index, word) in bitmap.allocated() {
                let mut bits = word.load(Ordering::Acquire);
                while bits != 0 {
                    let bit = bits.trailing_zeros() as u64;
                    out.push(self.map.address_of(segment, word_index * 64 + bit));
                    bits &= bits - 1;
                }
            }
        }
        let mut overflow: Vec<Address> = self.overflow.lock().iter().copied().collect();
        overflow.sort_unstable();
        out.extend(overflow);
        out
    }

    /// Bytes currently held by bitmap chunks and their directory leaves
    pub fn allocated_bytes(&self) -> usize {
        self.bitmaps.iter().map(|b| b.allocated_bytes()).sum()
    }
}

impl std::fmt::Debug for AddressSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSet")
            .field("segments", &self.map.len())
            .field("len", &self.len())
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> AddressSet {
        AddressSet::new(&[
            HeapSegment::new(0x1000_0000, 0x1040_0000),
            HeapSegment::new(0x7f00_0000_0000, 0x7f00_0100_0000),
        ])
    }

    #[test]
    fn test_add_and_contains() {
        let set = set();
        set.add(0x1000_1040);
        set.add(0x7f00_0000_0008);

        assert!(set.contains(0x1000_1040));
        assert!(set.contains(0x7f00_0000_0008));
        assert!(!set.contains(0x1000_1048));
        assert!(!set.contains(0x7f00_0000_0000));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_try_add_exactly_once() {
        let set = set();
        assert!(set.try_add(0x1000_0000));
        assert!(!set.try_add(0x1000_0000));
        set.add(0x1000_0000);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove() {
        let set = set();
        set.add(0x1000_0040);
        assert!(set.remove(0x1000_0040));
        assert!(!set.contains(0x1000_0040));
        assert!(!set.remove(0x1000_0040));
        assert!(set.is_empty());
        assert!(set.try_add(0x1000_0040));
    }

    #[test]
    fn test_foreign_and_unaligned_addresses() {
        let set = set();
        assert!(!set.contains(0xdead_beef));
        assert!(set.try_add(0xdead_beef));
        assert!(set.try_add(0x1000_0001));
        assert!(set.try_add(0));
        assert!(set.try_add(u64::MAX));

        assert!(set.contains(0xdead_beef));
        assert!(set.contains(0x1000_0001));
        assert!(!set.contains(0x1000_0000));
        assert!(set.contains(0));
        assert!(set.contains(u64::MAX));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_no_segments() {
        let set = AddressSet::new(&[]);
        assert!(set.try_add(0x1000));
        assert!(set.contains(0x1000));
        assert_eq!(set.allocated_bytes(), 0);
    }

    #[test]
    fn test_memory_follows_population() {
        let set = set();
        assert_eq!(set.allocated_bytes(), 0);
        set.add(0x1000_0000);
        let one_chunk = set.allocated_bytes();
        assert!(one_chunk > 0);
        set.add(0x1000_0008);
        assert_eq!(set.allocated_bytes(), one_chunk);
    }

    #[test]
    fn test_clear() {
        let mut set = set();
        set.add(0x1000_0000);
        set.add(0x1234);
        set.clear();
        assert!(set.is_empty());
        assert!(!set.contains(0x1000_0000));
        assert!(!set.contains(0x1234));
        assert_eq!(set.allocated_bytes(), 0);
    }

    #[test]
    fn test_to_vec_ordering() {
        let set = set();
        for a in [0x7f00_0000_0010, 0x1000_0100, 0x1000_0008, 0x42, 0x41] {
            set.add(a);
        }
        assert_eq!(
            set.to_vec(),
            vec![0x1000_0008, 0x1000_0100, 0x7f00_0000_0010, 0x41, 0x42]
        );
    }

    #[test]
    fn test_concurrent_try_add_single_winner() {
        let set = Arc::new(set());
        let addresses: Vec<Address> = (0..4096).map(|i| 0x1000_0000 + i * 8).collect();

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let set = Arc::clone(&set);
                    let addresses = &addresses;
                    scope.spawn(move || addresses.iter().filter(|&&a| set.try_add(a)).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(winners, addresses.len());
        assert_eq!(set.len(), addresses.len());
    }
}
