//! Root Enumeration - Lazy Sequence of Root Paths
//!
//! Every root is walked toward the target, on the calling thread or, with a
//! cache built and parallel search allowed, on a small worker pool:
//! ```text
//! ┌──────────────────────────────┐
//! │  Injector<RootRecord>        │   filled once, roots deduplicated
//! └──────────────────────────────┘
//!      │          │          │
//!      ▼          ▼          ▼
//!  gcroot-search-0 ...  gcroot-search-N    shared known / dead tables
//!      │          │          │
//!      └──────────┼──────────┘
//!                 ▼
//!     channel<Result<RootPath>>  ──►  RootPaths::next
//! ```
//! Dropping the iterator stops the workers and joins them.

use super::path::{KnownPaths, ObjectPath, RootPath};
use super::trace::QueryTrace;
use super::walk::RootWalker;
use crate::cancel::CancellationToken;
use crate::error::{GcRootError, Result};
use crate::heap::{Address, Expander, HeapGraphView, RootRecord, NULL_ADDRESS};
use crate::object_set::segment::SegmentMap;
use crate::object_set::AddressSet;
use crate::stats::SearchStats;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam_deque::{Injector, Steal};
use rustc_hash::FxHashSet;
use std::io;
use std::iter::FusedIterator;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(crate) const OPERATION: &str = "enumerate_gc_roots";

/// Tables shared by every walk of one enumeration
#[derive(Clone)]
pub(crate) struct QueryTables {
    pub(crate) map: Arc<SegmentMap>,
    pub(crate) known: Arc<KnownPaths>,
    pub(crate) dead: Arc<AddressSet>,
}

impl QueryTables {
    pub(crate) fn new(map: &Arc<SegmentMap>, target: Address) -> Self {
        Self {
            map: Arc::clone(map),
            known: Arc::new(KnownPaths::new(target)),
            dead: Arc::new(AddressSet::with_map(Arc::clone(map))),
        }
    }

    fn walker<'w, H: HeapGraphView + ?Sized>(&'w self, expander: Expander<'w, H>) -> RootWalker<'w, H> {
        RootWalker::new(expander, &self.map, &self.known, &self.dead, OPERATION)
    }
}

/// Lazy sequence of roots keeping a target alive
///
/// Returned by [`RootSearch::enumerate_gc_roots`](super::RootSearch::enumerate_gc_roots).
/// Yields `Err(Cancelled)` once if the token is signalled mid-iteration,
/// then ends.
pub struct RootPaths<'a, H: ?Sized> {
    source: RootSource<'a, H>,
    token: CancellationToken,
    trace: QueryTrace,
    done: bool,
}

enum RootSource<'a, H: ?Sized> {
    Empty,
    Sequential(SequentialRoots<'a, H>),
    Parallel(ParallelRoots),
}

impl<'a, H: HeapGraphView + ?Sized> RootPaths<'a, H> {
    pub(crate) fn empty(token: &CancellationToken, trace: QueryTrace) -> Self {
        Self::with_source(RootSource::Empty, token, trace)
    }

    pub(crate) fn sequential(roots: SequentialRoots<'a, H>, token: &CancellationToken, trace: QueryTrace) -> Self {
        Self::with_source(RootSource::Sequential(roots), token, trace)
    }

    pub(crate) fn parallel(roots: ParallelRoots, token: &CancellationToken, trace: QueryTrace) -> Self {
        Self::with_source(RootSource::Parallel(roots), token, trace)
    }

    fn with_source(source: RootSource<'a, H>, token: &CancellationToken, trace: QueryTrace) -> Self {
        Self {
            source,
            token: token.clone(),
            trace,
            done: false,
        }
    }

    /// Check if roots are walked on worker threads
    pub fn is_parallel(&self) -> bool {
        matches!(self.source, RootSource::Parallel(_))
    }

    fn fail(&mut self, err: GcRootError) -> GcRootError {
        self.done = true;
        self.source = RootSource::Empty;
        self.trace.fail(&err);
        err
    }
}

impl<H: HeapGraphView + ?Sized> Iterator for RootPaths<'_, H> {
    type Item = Result<RootPath>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(err) = self.token.check(OPERATION) {
            return Some(Err(self.fail(err)));
        }

        let item = match &mut self.source {
            RootSource::Empty => None,
            RootSource::Sequential(roots) => roots.next_path(&self.token),
            RootSource::Parallel(roots) => roots.next_path(),
        };

        match item {
            Some(Ok(root_path)) => {
                self.trace.record_result();
                Some(Ok(root_path))
            },
            Some(Err(err)) => Some(Err(self.fail(err))),
            None => {
                // Workers may have wound down because of a cancellation.
                if let Err(err) = self.token.check(OPERATION) {
                    return Some(Err(self.fail(err)));
                }
                self.done = true;
                self.source = RootSource::Empty;
                self.trace.finish();
                None
            },
        }
    }
}

impl<H: HeapGraphView + ?Sized> FusedIterator for RootPaths<'_, H> {}

/// Roots walked one by one on the calling thread
pub(crate) struct SequentialRoots<'a, H: ?Sized> {
    expander: Expander<'a, H>,
    roots: Box<dyn Iterator<Item = RootRecord> + 'a>,
    tables: QueryTables,
    seen: FxHashSet<Address>,
    unique_only: bool,
}

impl<'a, H: HeapGraphView + ?Sized> SequentialRoots<'a, H> {
    pub(crate) fn new(
        expander: Expander<'a, H>,
        roots: Box<dyn Iterator<Item = RootRecord> + 'a>,
        tables: QueryTables,
        unique_only: bool,
    ) -> Self {
        Self {
            expander,
            roots,
            tables,
            seen: FxHashSet::default(),
            unique_only,
        }
    }

    fn next_path(&mut self, token: &CancellationToken) -> Option<Result<RootPath>> {
        let walker = self.tables.walker(self.expander);
        for root in self.roots.by_ref() {
            if let Err(err) = token.check(OPERATION) {
                return Some(Err(err));
            }
            let object = root.object_address();
            if object == NULL_ADDRESS {
                continue;
            }
            if self.unique_only && !self.seen.insert(object) {
                continue;
            }
            match walker.walk(object, token) {
                Ok(Some(addresses)) => {
                    let path = ObjectPath::resolve(self.expander.heap(), &addresses);
                    return Some(Ok(RootPath { root, path }));
                },
                Ok(None) => {},
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}

/// Roots walked by a worker pool
pub(crate) struct ParallelRoots {
    results: Receiver<Result<RootPath>>,
    stop: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Starts a named worker thread
pub(crate) type SpawnFn<'s> = dyn FnMut(String, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> + 's;

fn spawn_thread(name: String, job: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(job)
}

impl ParallelRoots {
    /// Start `workers` threads over `roots`
    ///
    /// `roots` must already be free of null objects (and of duplicate
    /// objects when only unique roots are wanted). If a worker cannot be
    /// started, the ones already running are joined and `roots` is handed
    /// back untouched.
    pub(crate) fn spawn<H: HeapGraphView + ?Sized + 'static>(
        heap: &Arc<H>,
        stats: &Arc<SearchStats>,
        verbose: bool,
        tables: &QueryTables,
        roots: Vec<RootRecord>,
        workers: usize,
        token: &CancellationToken,
    ) -> std::result::Result<Self, Vec<RootRecord>> {
        Self::spawn_with(heap, stats, verbose, tables, roots, workers, token, &mut spawn_thread)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn_with<H: HeapGraphView + ?Sized + 'static>(
        heap: &Arc<H>,
        stats: &Arc<SearchStats>,
        verbose: bool,
        tables: &QueryTables,
        roots: Vec<RootRecord>,
        workers: usize,
        token: &CancellationToken,
        spawner: &mut SpawnFn<'_>,
    ) -> std::result::Result<Self, Vec<RootRecord>> {
        let queue = Arc::new(Injector::new());
        let (sender, results) = channel::unbounded();
        // Workers wait here until the queue is filled.
        let (start, started) = channel::unbounded::<()>();
        let stop = token.child();
        let mut pool = Self {
            results,
            stop: stop.clone(),
            handles: Vec::with_capacity(workers),
        };

        for id in 0..workers {
            let worker = RootWorker {
                heap: Arc::clone(heap),
                stats: Arc::clone(stats),
                verbose,
                tables: tables.clone(),
                queue: Arc::clone(&queue),
                results: sender.clone(),
                stop: stop.clone(),
                token: token.clone(),
            };
            let started = started.clone();
            let job: Box<dyn FnOnce() + Send> = Box::new(move || {
                if started.recv().is_ok() {
                    worker.run();
                }
            });
            match spawner(format!("gcroot-search-{}", id), job) {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    log::warn!(
                        "Failed to spawn root search worker {}: {}; walking {} roots on the calling thread",
                        id,
                        e,
                        roots.len()
                    );
                    // Release the waiting workers before joining them.
                    drop(start);
                    drop(pool);
                    return Err(roots);
                },
            }
        }

        for root in roots {
            queue.push(root);
        }
        for _ in 0..workers {
            let _ = start.send(());
        }
        log::debug!("Root enumeration fanned out to {} workers", workers);
        Ok(pool)
    }

    fn next_path(&mut self) -> Option<Result<RootPath>> {
        self.results.recv().ok()
    }
}

impl Drop for ParallelRoots {
    fn drop(&mut self) {
        self.stop.cancel();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::warn!("Root search worker panicked");
            }
        }
    }
}

struct RootWorker<H: ?Sized> {
    heap: Arc<H>,
    stats: Arc<SearchStats>,
    verbose: bool,
    tables: QueryTables,
    queue: Arc<Injector<RootRecord>>,
    results: Sender<Result<RootPath>>,
    /// Signalled by the caller's token or by the iterator going away
    stop: CancellationToken,
    token: CancellationToken,
}

/// Turns a worker panic into an error on the result channel
struct ReportPanic<'r>(&'r Sender<Result<RootPath>>);

impl Drop for ReportPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let _ = self.0.send(Err(GcRootError::Internal(
                "root search worker panicked".to_string(),
            )));
        }
    }
}

impl<H: HeapGraphView + ?Sized> RootWorker<H> {
    fn run(self) {
        let _guard = ReportPanic(&self.results);
        let expander = Expander::new(&*self.heap, &self.stats, self.verbose);
        let walker = self.tables.walker(expander);

        loop {
            let root = match self.queue.steal() {
                Steal::Success(root) => root,
                Steal::Empty => break,
                Steal::Retry => continue,
            };
            match walker.walk(root.object_address(), &self.stop) {
                Ok(Some(addresses)) => {
                    let path = ObjectPath::resolve(&*self.heap, &addresses);
                    if self.results.send(Ok(RootPath { root, path })).is_err() {
                        break;
                    }
                },
                Ok(None) => {},
                Err(err) => {
                    // A stop without a caller cancellation means nobody is
                    // listening any more.
                    if !err.is_cancelled() || self.token.is_cancelled() {
                        let _ = self.results.send(Err(err));
                    }
                    break;
                },
            }
        }
    }
}
