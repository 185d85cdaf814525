//! Segment Index - Address to Segment-Relative Slot
//!
//! Objects are pointer-aligned, so every segment is split into 8-byte slots:
//! ```text
//! Segment: 0x1000_0000 .. 0x1010_0000 (1MB)
//! Slot size: 8 bytes
//! Slots: 1MB / 8 = 131,072
//!
//! Object at 0x1000_0040:
//! - Offset: 0x40
//! - Slot: 0x40 / 8 = 8
//! ```
//! Storage hanging off a slot index is split into fixed-size chunks that are
//! only allocated when first written, so memory follows the populated parts
//! of the heap rather than its full extent.

use crate::heap::{Address, HeapSegment};
use std::sync::atomic::AtomicU64;
use std::sync::OnceLock;

/// Object alignment in the target process
pub(crate) const SLOT_SIZE: u64 = 8;
const SLOT_SHIFT: u32 = 3;

/// Bytes of each segment covered by slot indexing (4 TiB)
///
/// Addresses past this prefix of a wider segment are not located; callers
/// keep them in their overflow tables like foreign addresses.
pub(crate) const MAX_INDEXED_BYTES: u64 = 1 << 42;

/// Chunk slots per lazily allocated directory leaf
const LEAF_SHIFT: u32 = 11;

/// Sorted segment table
#[derive(Debug, Clone, Default)]
pub(crate) struct SegmentMap {
    segments: Vec<HeapSegment>,
}

impl SegmentMap {
    pub(crate) fn new(mut segments: Vec<HeapSegment>) -> Self {
        segments.retain(|s| !s.is_empty());
        segments.sort_by_key(|s| s.start);
        Self { segments }
    }

    pub(crate) fn len(&self) -> usize {
        self.segments.len()
    }

    /// Bytes of segment `index` that are slot-indexed
    fn indexed_len(&self, index: usize) -> u64 {
        self.segments[index].len().min(MAX_INDEXED_BYTES)
    }

    /// Number of slots in segment `index`
    pub(crate) fn slot_count(&self, index: usize) -> u64 {
        self.indexed_len(index).div_ceil(SLOT_SIZE)
    }

    /// Segment index and slot for `address`
    ///
    /// `None` for addresses outside every segment, past the indexed prefix
    /// of a segment, or unaligned; callers keep those in an overflow table.
    #[inline]
    pub(crate) fn locate(&self, address: Address) -> Option<(usize, u64)> {
        let index = self
            .segments
            .partition_point(|s| s.start <= address)
            .checked_sub(1)?;
        let segment = &self.segments[index];
        if !segment.contains(address) {
            return None;
        }
        let offset = address - segment.start;
        if offset & (SLOT_SIZE - 1) != 0 || offset >= self.indexed_len(index) {
            return None;
        }
        Some((index, offset >> SLOT_SHIFT))
    }

    /// Inverse of [`locate`](Self::locate)
    pub(crate) fn address_of(&self, index: usize, slot: u64) -> Address {
        self.segments[index].start + (slot << SLOT_SHIFT)
    }
}

type Chunk = Box<[AtomicU64]>;
type Leaf = Box<[OnceLock<Chunk>]>;

/// Lazily chunked array of atomic words
///
/// Chunks hang off a two-level directory and both levels are allocated on
/// first write, so an empty array costs one small root table however many
/// words it spans:
/// ```text
/// word ──► chunk = word >> chunk_shift
///          root[chunk >> 11] ──► leaf[chunk & 0x7ff] ──► [AtomicU64; 1 << chunk_shift]
/// ```
pub(crate) struct LazyWords {
    root: Box<[OnceLock<Leaf>]>,
    chunk_count: u64,
    chunk_shift: u32,
}

impl LazyWords {
    /// `word_count` words split into chunks of `1 << chunk_shift` words
    pub(crate) fn new(word_count: u64, chunk_shift: u32) -> Self {
        let chunk_count = word_count.div_ceil(1u64 << chunk_shift);
        let leaves = chunk_count.div_ceil(1u64 << LEAF_SHIFT) as usize;
        Self {
            root: (0..leaves).map(|_| OnceLock::new()).collect(),
            chunk_count,
            chunk_shift,
        }
    }

    #[inline]
    fn split(&self, word: u64) -> (usize, usize, usize) {
        let chunk = word >> self.chunk_shift;
        let within = (word & ((1u64 << self.chunk_shift) - 1)) as usize;
        let leaf = (chunk >> LEAF_SHIFT) as usize;
        let entry = (chunk & ((1u64 << LEAF_SHIFT) - 1)) as usize;
        (leaf, entry, within)
    }

    /// Chunk slots in leaf `leaf`; the last leaf may be short
    fn leaf_len(&self, leaf: usize) -> usize {
        let first = (leaf as u64) << LEAF_SHIFT;
        (self.chunk_count - first).min(1u64 << LEAF_SHIFT) as usize
    }

    /// Word at `word`, `None` if its chunk was never allocated
    #[inline]
    pub(crate) fn get(&self, word: u64) -> Option<&AtomicU64> {
        let (leaf, entry, within) = self.split(word);
        let chunk = self.root.get(leaf)?.get()?.get(entry)?.get()?;
        Some(&chunk[within])
    }

    /// Word at `word`, allocating its leaf and chunk on first use
    ///
    /// `word` must be below the `word_count` the array was built with.
    #[inline]
    pub(crate) fn get_or_alloc(&self, word: u64) -> &AtomicU64 {
        let (leaf, entry, within) = self.split(word);
        let words = 1usize << self.chunk_shift;
        let chunks = self.root[leaf]
            .get_or_init(|| (0..self.leaf_len(leaf)).map(|_| OnceLock::new()).collect());
        let chunk = chunks[entry].get_or_init(|| (0..words).map(|_| AtomicU64::new(0)).collect());
        &chunk[within]
    }

    fn chunks(&self) -> impl Iterator<Item = (u64, &Chunk)> + '_ {
        self.root
            .iter()
            .enumerate()
            .filter_map(|(i, leaf)| leaf.get().map(|chunks| (i, chunks)))
            .flat_map(|(i, chunks)| {
                chunks.iter().enumerate().filter_map(move |(j, c)| {
                    c.get().map(|words| ((((i as u64) << LEAF_SHIFT) + j as u64), words))
                })
            })
    }

    /// Iterate `(word index, word)` over allocated chunks
    pub(crate) fn allocated(&self) -> impl Iterator<Item = (u64, &AtomicU64)> + '_ {
        let shift = self.chunk_shift;
        self.chunks().flat_map(move |(chunk, words)| {
            words
                .iter()
                .enumerate()
                .map(move |(j, w)| ((chunk << shift) + j as u64, w))
        })
    }

    /// Bytes held by the directory and allocated chunks
    pub(crate) fn allocated_bytes(&self) -> usize {
        let slot = std::mem::size_of::<OnceLock<Chunk>>();
        let per_chunk = (1usize << self.chunk_shift) * std::mem::size_of::<AtomicU64>();
        let leaves: usize = self
            .root
            .iter()
            .enumerate()
            .filter(|(_, leaf)| leaf.get().is_some())
            .map(|(i, _)| self.leaf_len(i) * slot)
            .sum();
        leaves + self.chunks().count() * per_chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn map() -> SegmentMap {
        SegmentMap::new(vec![
            HeapSegment::new(0x9000, 0xa000),
            HeapSegment::new(0x1000, 0x2000),
            HeapSegment::new(0x5000, 0x5000),
        ])
    }

    #[test]
    fn test_locate_sorted_and_skips_empty() {
        let map = map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.locate(0x1000), Some((0, 0)));
        assert_eq!(map.locate(0x1040), Some((0, 8)));
        assert_eq!(map.locate(0x9ff8), Some((1, 0x1ff)));
    }

    #[test]
    fn test_locate_rejects_gaps_and_unaligned() {
        let map = map();
        assert_eq!(map.locate(0x0), None);
        assert_eq!(map.locate(0x2000), None);
        assert_eq!(map.locate(0x5000), None);
        assert_eq!(map.locate(0x1004), None);
        assert_eq!(map.locate(u64::MAX), None);
    }

    #[test]
    fn test_address_of_inverts_locate() {
        let map = map();
        let (segment, slot) = map.locate(0x9128).unwrap();
        assert_eq!(map.address_of(segment, slot), 0x9128);
        assert_eq!(map.slot_count(0), 0x200);
    }

    #[test]
    fn test_lazy_words_allocate_on_write() {
        let words = LazyWords::new(10_000, 6);
        assert!(words.get(5_000).is_none());
        assert_eq!(words.allocated_bytes(), 0);

        words.get_or_alloc(5_000).store(7, Ordering::Relaxed);
        assert_eq!(words.get(5_000).unwrap().load(Ordering::Relaxed), 7);
        // One leaf of 157 chunk slots plus one 64-word chunk.
        assert_eq!(
            words.allocated_bytes(),
            157 * std::mem::size_of::<OnceLock<Chunk>>() + 64 * 8
        );

        let set: Vec<_> = words
            .allocated()
            .filter(|(_, w)| w.load(Ordering::Relaxed) != 0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(set, vec![5_000]);
    }

    #[test]
    fn test_wide_segment_indexes_prefix_only() {
        let map = SegmentMap::new(vec![HeapSegment::new(0x1000, u64::MAX)]);
        assert_eq!(map.slot_count(0), MAX_INDEXED_BYTES / SLOT_SIZE);
        assert_eq!(map.locate(0x1000), Some((0, 0)));
        assert_eq!(map.locate(0x1000 + MAX_INDEXED_BYTES - 8), Some((0, MAX_INDEXED_BYTES / 8 - 1)));
        assert_eq!(map.locate(0x1000 + MAX_INDEXED_BYTES), None);
        assert_eq!(map.locate(u64::MAX - 0x1000), None);
    }

    #[test]
    fn test_lazy_words_directory_is_sparse() {
        // 4 TiB of 8-byte slots as bitmap words.
        let words = LazyWords::new((MAX_INDEXED_BYTES / SLOT_SIZE).div_ceil(64), 10);
        assert_eq!(words.root.len(), 4096);
        assert_eq!(words.allocated_bytes(), 0);

        let last = (MAX_INDEXED_BYTES / SLOT_SIZE).div_ceil(64) - 1;
        words.get_or_alloc(last).store(1, Ordering::Relaxed);
        words.get_or_alloc(0).store(2, Ordering::Relaxed);
        assert_eq!(
            words.allocated_bytes(),
            2 * (2048 * std::mem::size_of::<OnceLock<Chunk>>() + 1024 * 8)
        );

        let set: Vec<_> = words
            .allocated()
            .filter(|(_, w)| w.load(Ordering::Relaxed) != 0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(set, vec![0, last]);
    }
}
