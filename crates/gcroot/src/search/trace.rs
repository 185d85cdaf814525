//! Query bookkeeping: counters, `log` lines and structured events for one
//! query from start to its last result.

use crate::error::GcRootError;
use crate::heap::Address;
use crate::logging::{log_event, SearchEvent};
use crate::stats::{SearchStats, SearchTimer};
use std::sync::Arc;

pub(crate) struct QueryTrace {
    query: &'static str,
    stats: Arc<SearchStats>,
    timer: SearchTimer,
    results: usize,
    verbose: bool,
    finished: bool,
}

impl QueryTrace {
    pub(crate) fn start(
        query: &'static str,
        source: Option<Address>,
        target: Address,
        cached: bool,
        stats: &Arc<SearchStats>,
        verbose: bool,
    ) -> Self {
        stats.record_query();
        log::debug!(
            "{} started: source {:?}, target {:#x}, cached {}",
            query,
            source.map(|s| format!("{:#x}", s)),
            target,
            cached
        );
        if verbose {
            log_event(SearchEvent::QueryStart {
                query,
                source,
                target,
                cached,
            });
        }
        Self {
            query,
            stats: Arc::clone(stats),
            timer: SearchTimer::new(),
            results: 0,
            verbose,
            finished: false,
        }
    }

    pub(crate) fn record_result(&mut self) {
        self.results += 1;
        self.stats.record_path();
    }

    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        log::debug!(
            "{} completed: {} results in {}us",
            self.query,
            self.results,
            self.timer.elapsed_us()
        );
        if self.verbose {
            log_event(SearchEvent::QueryEnd {
                query: self.query,
                results: self.results,
                duration_ms: self.timer.elapsed_ms(),
            });
        }
    }

    pub(crate) fn fail(&mut self, err: &GcRootError) {
        if self.finished {
            return;
        }
        self.finished = true;
        match err {
            GcRootError::Cancelled { operation } => {
                log::debug!("{} cancelled after {} results", operation, self.results);
                if self.verbose {
                    log_event(SearchEvent::Cancelled {
                        operation: *operation,
                    });
                }
            },
            other => log::warn!("{} failed: {}", self.query, other),
        }
    }
}
