//! Search Module - Root and Path Queries
//!
//! [`RootSearch`] answers "why is this object alive?" over a
//! [`HeapGraphView`]. It runs in one of two states:
//! ```text
//!              build_cache (ok)
//!   ┌──────────┐ ──────────────► ┌──────────┐
//!   │ Uncached │                 │  Cached  │
//!   └──────────┘ ◄────────────── └──────────┘
//!     ▲     │      clear_cache
//!     └─────┘
//!   build_cache (cancelled)
//! ```
//! Both states answer every query with the same roots and paths; the
//! cache only changes how much of the heap each query touches.
//!
//! # Queries
//!
//! - [`enumerate_gc_roots`](RootSearch::enumerate_gc_roots) - every root
//!   keeping a target alive, each with a path
//! - [`find_single_path`](RootSearch::find_single_path) - one path between
//!   two objects
//! - [`enumerate_all_paths`](RootSearch::enumerate_all_paths) - every simple
//!   path between two objects
//!
//! Each takes a [`CancellationToken`]; a signalled token fails the call (or
//! the next iteration step) with `GcRootError::Cancelled`.

pub mod all_paths;
pub mod path;
pub mod roots;
mod trace;
mod walk;

pub use all_paths::AllPaths;
pub use path::{ObjectPath, RootPath};
pub use roots::RootPaths;

use crate::cache::{CacheBuilder, ReachabilityCache};
use crate::cancel::CancellationToken;
use crate::config::SearchConfig;
use crate::error::Result;
use crate::heap::{Address, Expander, HeapGraphView, RootRecord, NULL_ADDRESS};
use crate::logging::{log_event, SearchEvent};
use crate::object_set::segment::SegmentMap;
use crate::object_set::AddressSet;
use crate::stats::{SearchStats, SearchSummary, SearchTimer};
use path::KnownPaths;
use roots::{ParallelRoots, QueryTables, SequentialRoots};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use trace::QueryTrace;
use walk::RootWalker;

const FIND_SINGLE_PATH: &str = "find_single_path";

/// GC root and path search over one heap
///
/// # Examples
///
/// ```rust
/// use gcroot::heap::HeapSnapshotBuilder;
/// use gcroot::{CancellationToken, RootSearch};
///
/// let heap = HeapSnapshotBuilder::new()
///     .segment(0x1000, 0x2000)
///     .object(0x1000, "Cache", &[0x1020])
///     .object(0x1020, "Entry", &[])
///     .static_root("Program.s_cache", 0x1000)
///     .build_shared()
///     .unwrap();
///
/// let search = RootSearch::new(heap);
/// let token = CancellationToken::none();
/// let roots: Vec<_> = search
///     .enumerate_gc_roots(0x1020, false, &token)
///     .unwrap()
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(roots.len(), 1);
/// assert_eq!(roots[0].path.addresses(), vec![0x1000, 0x1020]);
/// ```
pub struct RootSearch<H: HeapGraphView + ?Sized> {
    heap: Arc<H>,
    config: SearchConfig,
    map: Arc<SegmentMap>,
    cache: Option<Arc<ReachabilityCache>>,
    stats: Arc<SearchStats>,
}

/// Name used by callers coming from heap-analysis tooling
pub type GCRoot<H> = RootSearch<H>;

impl<H: HeapGraphView + ?Sized + 'static> RootSearch<H> {
    /// Create an uncached search with the default configuration
    pub fn new(heap: Arc<H>) -> Self {
        let config = SearchConfig::default();
        let stats = Arc::new(SearchStats::new(config.stats_enabled));
        let map = Arc::new(SegmentMap::new(heap.segments()));
        Self {
            heap,
            config,
            map,
            cache: None,
            stats,
        }
    }

    /// Create an uncached search with a validated configuration
    pub fn with_config(heap: Arc<H>, config: SearchConfig) -> Result<Self> {
        config.validate()?;
        let mut search = Self::new(heap);
        search.stats.set_enabled(config.stats_enabled);
        search.config = config;
        Ok(search)
    }

    /// The heap being searched
    pub fn heap(&self) -> &Arc<H> {
        &self.heap
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Counters accumulated by every operation so far
    pub fn stats(&self) -> SearchSummary {
        self.stats.summary()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Check if a reachability cache is built
    pub fn is_fully_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// The reachability cache, if built
    pub fn cache(&self) -> Option<&ReachabilityCache> {
        self.cache.as_deref()
    }

    /// Check if queries may fan out to worker threads once cached
    pub fn allow_parallel_search(&self) -> bool {
        self.config.allow_parallel_search
    }

    pub fn set_allow_parallel_search(&mut self, allow: bool) {
        self.config.allow_parallel_search = allow;
    }

    fn expander(&self) -> Expander<'_, H> {
        Expander::new(&*self.heap, &self.stats, self.config.verbose)
    }

    /// Trace the whole heap and index every reachable object
    ///
    /// Any existing cache is dropped first. On cancellation the partial
    /// index is discarded and the search stays uncached; calling again
    /// starts from scratch.
    pub fn build_cache(&mut self, token: &CancellationToken) -> Result<()> {
        self.cache = None;
        let timer = SearchTimer::new();
        let workers = self.config.effective_workers();
        let verbose = self.config.verbose;

        if verbose {
            log_event(SearchEvent::CacheBuildStart {
                roots: self.heap.enumerate_roots().count(),
                workers,
            });
        }

        let builder = CacheBuilder::new(self.expander(), Arc::clone(&self.map));
        if let Err(err) = builder.run(workers, token) {
            let visited = builder.visited();
            if err.is_cancelled() {
                self.stats.record_cache_build_cancelled();
                log::debug!("Cache build cancelled after {} objects", visited);
                if verbose {
                    log_event(SearchEvent::CacheBuildCancelled {
                        visited,
                        duration_ms: timer.elapsed_ms(),
                    });
                }
            } else {
                log::warn!("Cache build failed after {} objects: {}", visited, err);
            }
            return Err(err);
        }

        let cache = builder.finish();
        self.stats.record_cache_build();
        log::debug!(
            "Cache built: {} reachable objects, {} bytes, {}us",
            cache.len(),
            cache.allocated_bytes(),
            timer.elapsed_us()
        );
        if verbose {
            log_event(SearchEvent::CacheBuildEnd {
                objects: cache.len(),
                duration_ms: timer.elapsed_ms(),
            });
        }
        self.cache = Some(Arc::new(cache));
        Ok(())
    }

    /// Drop the cache; later queries walk the heap directly
    pub fn clear_cache(&mut self) {
        if let Some(cache) = self.cache.take() {
            log::debug!("Cache cleared ({} objects)", cache.len());
            if self.config.verbose {
                log_event(SearchEvent::CacheCleared {
                    objects: cache.len(),
                });
            }
        }
    }

    /// Every root from which `target` is reachable, with a path each
    ///
    /// With `unique_only`, roots pointing at the same object are reported
    /// once. Results are produced lazily; each call walks the root set
    /// afresh.
    pub fn enumerate_gc_roots(
        &self,
        target: Address,
        unique_only: bool,
        token: &CancellationToken,
    ) -> Result<RootPaths<'_, H>> {
        token.check(roots::OPERATION)?;
        let trace = QueryTrace::start(
            roots::OPERATION,
            None,
            target,
            self.is_fully_cached(),
            &self.stats,
            self.config.verbose,
        );
        if target == NULL_ADDRESS {
            return Ok(RootPaths::empty(token, trace));
        }

        let tables = QueryTables::new(&self.map, target);
        let mut roots: Box<dyn Iterator<Item = RootRecord> + '_> = self.heap.enumerate_roots();

        if let Some(cache) = &self.cache {
            match cache.chain_to_root(target) {
                Some(chain) => tables.known.record(&chain),
                None => return Ok(RootPaths::empty(token, trace)),
            }

            let workers = self.config.effective_workers();
            if self.config.allow_parallel_search && workers > 1 {
                let mut collected = collect_roots(roots, unique_only);
                if collected.len() >= self.config.parallel_root_threshold {
                    match ParallelRoots::spawn(
                        &self.heap,
                        &self.stats,
                        self.config.verbose,
                        &tables,
                        collected,
                        workers,
                        token,
                    ) {
                        Ok(pool) => return Ok(RootPaths::parallel(pool, token, trace)),
                        Err(returned) => collected = returned,
                    }
                }
                roots = Box::new(collected.into_iter());
            }
        }

        let sequential = SequentialRoots::new(self.expander(), roots, tables, unique_only);
        Ok(RootPaths::sequential(sequential, token, trace))
    }

    /// One path from `source` to `target`, `None` if there is none
    pub fn find_single_path(
        &self,
        source: Address,
        target: Address,
        token: &CancellationToken,
    ) -> Result<Option<ObjectPath>> {
        token.check(FIND_SINGLE_PATH)?;
        let mut trace = QueryTrace::start(
            FIND_SINGLE_PATH,
            Some(source),
            target,
            self.is_fully_cached(),
            &self.stats,
            self.config.verbose,
        );
        if source == NULL_ADDRESS || target == NULL_ADDRESS {
            trace.finish();
            return Ok(None);
        }

        let known = KnownPaths::new(target);
        if let Some(cache) = &self.cache {
            if cache.contains(source) && !cache.contains(target) {
                trace.finish();
                return Ok(None);
            }
            if let Some(chain) = cache.chain_to_root(target) {
                known.record(&chain);
            }
        }

        let dead = AddressSet::with_map(Arc::clone(&self.map));
        let walker = RootWalker::new(self.expander(), &self.map, &known, &dead, FIND_SINGLE_PATH);
        match walker.walk(source, token) {
            Ok(found) => {
                let path = found.map(|addresses| ObjectPath::resolve(&*self.heap, &addresses));
                if path.is_some() {
                    trace.record_result();
                }
                trace.finish();
                Ok(path)
            },
            Err(err) => {
                trace.fail(&err);
                Err(err)
            },
        }
    }

    /// Every simple path from `source` to `target`
    ///
    /// With `unique_only`, each object is explored at most once over the
    /// whole enumeration, so paths after the first through an object are
    /// suppressed.
    pub fn enumerate_all_paths(
        &self,
        source: Address,
        target: Address,
        unique_only: bool,
        token: &CancellationToken,
    ) -> Result<AllPaths<'_, H>> {
        token.check(all_paths::OPERATION)?;
        let trace = QueryTrace::start(
            all_paths::OPERATION,
            Some(source),
            target,
            self.is_fully_cached(),
            &self.stats,
            self.config.verbose,
        );

        let unreachable = source == NULL_ADDRESS
            || target == NULL_ADDRESS
            || self
                .cache
                .as_ref()
                .is_some_and(|cache| cache.contains(source) && !cache.contains(target));
        if unreachable {
            return Ok(AllPaths::empty(self.expander(), &self.map, token, trace));
        }

        Ok(AllPaths::new(
            self.expander(),
            &self.map,
            source,
            target,
            unique_only,
            token,
            trace,
        ))
    }
}

impl<H: HeapGraphView + ?Sized> std::fmt::Debug for RootSearch<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSearch")
            .field("segments", &self.map.len())
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

/// Drain the root enumeration, dropping null objects and, if asked,
/// repeated objects
fn collect_roots<'a>(roots: Box<dyn Iterator<Item = RootRecord> + 'a>, unique_only: bool) -> Vec<RootRecord> {
    let mut seen = FxHashSet::default();
    roots
        .filter(|root| root.object_address() != NULL_ADDRESS)
        .filter(|root| !unique_only || seen.insert(root.object_address()))
        .collect()
}
