//! Reachability Cache - Back-Pointer Index Over the Live Graph
//!
//! Built once by tracing from every root. Each object is claimed by exactly
//! one discoverer through `AddressSet::try_add`, and that discoverer is
//! stored as the object's parent:
//! ```text
//!   root slot ──► A ──► B ──► D
//!                 │           ▲
//!                 └──► C ─────┘   (D already claimed by B)
//!
//!   parent(D) = B, parent(B) = A, parent(A) = 0 (root object)
//!   chain_to_root(D) = [A, B, D]
//! ```
//! The chain is one arbitrary but fixed path, not necessarily the shortest.
//!
//! ## Parallel Build
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │      Injector (root objects, seeded once)    │
//! └─────────────────────────────────────────────┘
//!          │               │               │
//!          ▼               ▼               ▼
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │gcroot-cache-0│ │gcroot-cache-1│ │gcroot-cache-N│
//! │  LIFO deque  │◄┤  LIFO deque  │◄┤  LIFO deque  │  steal when empty
//! └──────────────┘ └──────────────┘ └──────────────┘
//! ```
//! A shared pending counter tracks discovered-but-unexpanded objects;
//! workers exit once it drops to zero.

pub(crate) mod arena;

use crate::cancel::CancellationToken;
use crate::error::{GcRootError, Result};
use crate::heap::{Address, Expander, HeapGraphView, NULL_ADDRESS};
use crate::object_set::segment::SegmentMap;
use crate::object_set::AddressSet;
use arena::BackPointerArena;
use crossbeam::utils::Backoff;
use crossbeam_deque::{Injector, Stealer, Worker};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const OPERATION: &str = "build_cache";

/// Reachability index built by `RootSearch::build_cache`
pub struct ReachabilityCache {
    reached: AddressSet,
    parents: BackPointerArena,
}

impl ReachabilityCache {
    fn empty(map: Arc<SegmentMap>) -> Self {
        Self {
            reached: AddressSet::with_map(Arc::clone(&map)),
            parents: BackPointerArena::new(map),
        }
    }

    /// Check if `address` is reachable from some root
    #[inline]
    pub fn contains(&self, address: Address) -> bool {
        self.reached.contains(address)
    }

    /// Object that discovered `address`
    ///
    /// `None` if `address` is not cached or is itself a root object.
    pub fn parent(&self, address: Address) -> Option<Address> {
        if !self.contains(address) {
            return None;
        }
        match self.parents.parent(address) {
            NULL_ADDRESS => None,
            parent => Some(parent),
        }
    }

    /// Check if `address` was reached directly from a root slot
    pub fn is_root_object(&self, address: Address) -> bool {
        self.contains(address) && self.parents.parent(address) == NULL_ADDRESS
    }

    /// Cached path from a root object to `address`, root object first
    ///
    /// `None` if `address` is not cached.
    pub fn chain_to_root(&self, address: Address) -> Option<Vec<Address>> {
        if !self.contains(address) {
            return None;
        }
        let limit = self.len();
        let mut chain = vec![address];
        let mut current = address;
        while let Some(parent) = self.parent(current) {
            if chain.len() > limit {
                log::warn!(
                    "Back-pointer chain from {:#x} exceeds {} objects, dropping it",
                    address,
                    limit
                );
                return None;
            }
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        Some(chain)
    }

    /// Number of reachable objects
    pub fn len(&self) -> usize {
        self.reached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reached.is_empty()
    }

    /// The set of reachable objects
    pub fn reached(&self) -> &AddressSet {
        &self.reached
    }

    /// Bytes held by the bitmap and arena chunks
    pub fn allocated_bytes(&self) -> usize {
        self.reached.allocated_bytes() + self.parents.allocated_bytes()
    }
}

impl std::fmt::Debug for ReachabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityCache")
            .field("objects", &self.len())
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

/// Queues shared by parallel build workers
#[derive(Clone, Copy)]
struct Shared<'s> {
    injector: &'s Injector<Address>,
    stealers: &'s [Stealer<Address>],
    pending: &'s AtomicUsize,
    abort: &'s AtomicBool,
}

impl Shared<'_> {
    fn steal(&self, local: &Worker<Address>) -> Option<Address> {
        std::iter::repeat_with(|| {
            self.injector
                .steal_batch_and_pop(local)
                .or_else(|| self.stealers.iter().map(|s| s.steal()).collect())
        })
        .find(|s| !s.is_retry())
        .and_then(|s| s.success())
    }
}

/// Stops the other workers if this one unwinds; they would otherwise wait
/// forever on the object it never finished.
struct AbortOnPanic<'s>(&'s AtomicBool);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.store(true, Ordering::Release);
        }
    }
}

/// Traces the heap into a [`ReachabilityCache`]
pub(crate) struct CacheBuilder<'a, H: ?Sized> {
    expander: Expander<'a, H>,
    cache: ReachabilityCache,
}

impl<'a, H: HeapGraphView + ?Sized> CacheBuilder<'a, H> {
    pub(crate) fn new(expander: Expander<'a, H>, map: Arc<SegmentMap>) -> Self {
        Self {
            expander,
            cache: ReachabilityCache::empty(map),
        }
    }

    /// Objects discovered so far
    pub(crate) fn visited(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn finish(self) -> ReachabilityCache {
        self.cache
    }

    /// Trace from every root
    ///
    /// On error the partial state is meaningless; drop the builder.
    pub(crate) fn run(&self, workers: usize, token: &CancellationToken) -> Result<()> {
        token.check(OPERATION)?;
        let seeds = self.seed_roots(token)?;
        log::debug!(
            "Tracing from {} root objects with {} workers",
            seeds.len(),
            workers
        );

        if workers <= 1 || seeds.len() < 2 {
            self.run_sequential(seeds, token)
        } else {
            self.run_parallel(seeds, workers, token)
        }
    }

    #[inline]
    fn discover(&self, child: Address, parent: Address) -> bool {
        if self.cache.reached.try_add(child) {
            self.cache.parents.record(child, parent);
            true
        } else {
            false
        }
    }

    /// Claim every root object before tracing so each of them is recorded
    /// as a chain start
    fn seed_roots(&self, token: &CancellationToken) -> Result<Vec<Address>> {
        let mut seeds = Vec::new();
        for root in self.expander.heap().enumerate_roots() {
            token.check(OPERATION)?;
            let object = root.object_address();
            if object != NULL_ADDRESS && self.discover(object, NULL_ADDRESS) {
                seeds.push(object);
            }
        }
        Ok(seeds)
    }

    fn run_sequential(&self, mut stack: Vec<Address>, token: &CancellationToken) -> Result<()> {
        let mut refs = Vec::new();
        while let Some(object) = stack.pop() {
            token.check(OPERATION)?;
            self.expander.expand(object, &mut refs);
            for &child in &refs {
                if self.discover(child, object) {
                    stack.push(child);
                }
            }
        }
        Ok(())
    }

    fn run_parallel(&self, seeds: Vec<Address>, workers: usize, token: &CancellationToken) -> Result<()> {
        let injector = Injector::new();
        let pending = AtomicUsize::new(seeds.len());
        for seed in seeds {
            injector.push(seed);
        }
        let abort = AtomicBool::new(false);
        let locals: Vec<Worker<Address>> = (0..workers).map(|_| Worker::new_lifo()).collect();
        let stealers: Vec<Stealer<Address>> = locals.iter().map(Worker::stealer).collect();
        let shared = Shared {
            injector: &injector,
            stealers: &stealers,
            pending: &pending,
            abort: &abort,
        };

        thread::scope(|scope| {
            let mut outcome = Ok(());
            let mut handles = Vec::with_capacity(workers);

            for (id, local) in locals.into_iter().enumerate() {
                let spawned = thread::Builder::new()
                    .name(format!("gcroot-cache-{}", id))
                    .spawn_scoped(scope, move || self.worker_loop(local, shared, token));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        log::warn!("Failed to spawn cache worker {}: {}", id, e);
                        abort.store(true, Ordering::Release);
                        outcome = Err(GcRootError::ThreadSpawn(e.to_string()));
                        break;
                    },
                }
            }

            for handle in handles {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(GcRootError::Internal("cache worker panicked".to_string()))
                });
                if outcome.is_ok() {
                    outcome = result;
                }
            }
            outcome
        })
    }

    fn worker_loop(&self, local: Worker<Address>, shared: Shared<'_>, token: &CancellationToken) -> Result<()> {
        let _guard = AbortOnPanic(shared.abort);
        let backoff = Backoff::new();
        let mut refs = Vec::new();

        loop {
            if shared.abort.load(Ordering::Acquire) {
                return Ok(());
            }
            if token.is_cancelled() {
                shared.abort.store(true, Ordering::Release);
                return Err(GcRootError::cancelled(OPERATION));
            }

            match local.pop().or_else(|| shared.steal(&local)) {
                Some(object) => {
                    backoff.reset();
                    self.expander.expand(object, &mut refs);
                    for &child in &refs {
                        if self.discover(child, object) {
                            shared.pending.fetch_add(1, Ordering::AcqRel);
                            local.push(child);
                        }
                    }
                    shared.pending.fetch_sub(1, Ordering::AcqRel);
                },
                None => {
                    if shared.pending.load(Ordering::Acquire) == 0 {
                        return Ok(());
                    }
                    backoff.snooze();
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{HeapSnapshot, HeapSnapshotBuilder};
    use crate::stats::SearchStats;

    fn diamond() -> HeapSnapshot {
        HeapSnapshotBuilder::new()
            .segment(0x1000, 0x2000)
            .object(0x1000, "A", &[0x1010, 0x1020])
            .object(0x1010, "B", &[0x1030])
            .object(0x1020, "C", &[0x1030])
            .object(0x1030, "D", &[0x1000])
            .object(0x1040, "Unreached", &[0x1000])
            .static_root("s_a", 0x1000)
            .build()
            .unwrap()
    }

    fn build(heap: &HeapSnapshot, workers: usize, token: &CancellationToken) -> Result<ReachabilityCache> {
        let stats = SearchStats::default();
        let map = Arc::new(SegmentMap::new(heap.segments()));
        let builder = CacheBuilder::new(Expander::new(heap, &stats, false), map);
        builder.run(workers, token)?;
        Ok(builder.finish())
    }

    #[test]
    fn test_reached_set() {
        let heap = diamond();
        let cache = build(&heap, 1, &CancellationToken::none()).unwrap();
        assert_eq!(cache.len(), 4);
        assert!(cache.contains(0x1030));
        assert!(!cache.contains(0x1040));
        assert!(cache.is_root_object(0x1000));
        assert_eq!(cache.parent(0x1000), None);
    }

    #[test]
    fn test_chain_follows_edges() {
        let heap = diamond();
        let cache = build(&heap, 1, &CancellationToken::none()).unwrap();
        let chain = cache.chain_to_root(0x1030).unwrap();

        assert_eq!(chain.first(), Some(&0x1000));
        assert_eq!(chain.last(), Some(&0x1030));
        assert_eq!(chain.len(), 3);
        assert!(cache.chain_to_root(0x1040).is_none());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut builder = HeapSnapshotBuilder::new().segment(0x10_0000, 0x20_0000);
        for i in 0..512u64 {
            let address = 0x10_0000 + i * 0x10;
            let next = 0x10_0000 + ((i * 7 + 3) % 512) * 0x10;
            let other = 0x10_0000 + ((i * 13 + 1) % 512) * 0x10;
            builder = builder.object(address, "Node", &[next, other]);
        }
        for i in 0..8u64 {
            builder = builder.static_root(&format!("s_{}", i), 0x10_0000 + i * 0x400);
        }
        let heap = builder.build().unwrap();

        let sequential = build(&heap, 1, &CancellationToken::none()).unwrap();
        let parallel = build(&heap, 4, &CancellationToken::none()).unwrap();
        assert_eq!(sequential.reached().to_vec(), parallel.reached().to_vec());

        for address in parallel.reached().to_vec() {
            let chain = parallel.chain_to_root(address).unwrap();
            assert!(parallel.is_root_object(chain[0]));
            for pair in chain.windows(2) {
                let mut refs = Vec::new();
                heap.enumerate_object_references(pair[0], &mut |r| refs.push(r.address));
                assert!(refs.contains(&pair[1]));
            }
        }
    }

    #[test]
    fn test_unresolved_referent_is_leaf() {
        let heap = HeapSnapshotBuilder::new()
            .segment(0x1000, 0x2000)
            .object(0x1000, "A", &[0x1ff0, 0xdead_0000])
            .static_root("s_a", 0x1000)
            .build()
            .unwrap();
        let cache = build(&heap, 1, &CancellationToken::none()).unwrap();
        assert!(cache.contains(0xdead_0000));
        assert_eq!(cache.parent(0xdead_0000), Some(0x1000));
        assert_eq!(cache.chain_to_root(0x1ff0), Some(vec![0x1000, 0x1ff0]));
    }

    #[test]
    fn test_cancelled_before_start() {
        let heap = diamond();
        let token = CancellationToken::new();
        token.cancel();
        for workers in [1, 4] {
            let err = build(&heap, workers, &token).unwrap_err();
            assert!(err.is_cancelled());
        }
    }

    #[test]
    fn test_null_root_skipped() {
        let heap = HeapSnapshotBuilder::new()
            .segment(0x1000, 0x2000)
            .object(0x1000, "A", &[])
            .static_root("s_null", NULL_ADDRESS)
            .static_root("s_a", 0x1000)
            .build()
            .unwrap();
        let cache = build(&heap, 2, &CancellationToken::none()).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains(NULL_ADDRESS));
    }
}
