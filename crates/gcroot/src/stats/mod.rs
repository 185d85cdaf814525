//! Stats Module - Search Counters
//!
//! Counts the work searches do so callers can see how much of the heap a
//! query touched and how much of it looked corrupt.

pub mod timer;

pub use timer::SearchTimer;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// SearchStats - counters shared by every query of one `RootSearch`
#[derive(Debug)]
pub struct SearchStats {
    enabled: AtomicBool,
    objects_visited: AtomicU64,
    edges_followed: AtomicU64,
    unresolved_objects: AtomicU64,
    cache_builds: AtomicU64,
    cache_builds_cancelled: AtomicU64,
    queries: AtomicU64,
    paths_found: AtomicU64,
}

impl SearchStats {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            objects_visited: AtomicU64::new(0),
            edges_followed: AtomicU64::new(0),
            unresolved_objects: AtomicU64::new(0),
            cache_builds: AtomicU64::new(0),
            cache_builds_cancelled: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            paths_found: AtomicU64::new(0),
        }
    }

    #[inline]
    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.enabled.load(Ordering::Relaxed) {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    /// Record one expanded object and the edges it had
    #[inline]
    pub fn record_visit(&self, edges: usize) {
        self.bump(&self.objects_visited, 1);
        self.bump(&self.edges_followed, edges as u64);
    }

    /// Record an object whose type could not be resolved
    #[inline]
    pub fn record_unresolved(&self) {
        self.bump(&self.unresolved_objects, 1);
    }

    pub fn record_cache_build(&self) {
        self.bump(&self.cache_builds, 1);
    }

    pub fn record_cache_build_cancelled(&self) {
        self.bump(&self.cache_builds_cancelled, 1);
    }

    pub fn record_query(&self) {
        self.bump(&self.queries, 1);
    }

    pub fn record_path(&self) {
        self.bump(&self.paths_found, 1);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Get summary statistics
    pub fn summary(&self) -> SearchSummary {
        SearchSummary {
            objects_visited: self.objects_visited.load(Ordering::Relaxed),
            edges_followed: self.edges_followed.load(Ordering::Relaxed),
            unresolved_objects: self.unresolved_objects.load(Ordering::Relaxed),
            cache_builds: self.cache_builds.load(Ordering::Relaxed),
            cache_builds_cancelled: self.cache_builds_cancelled.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            paths_found: self.paths_found.load(Ordering::Relaxed),
        }
    }

    /// Reset statistics
    pub fn reset(&self) {
        for counter in [
            &self.objects_visited,
            &self.edges_followed,
            &self.unresolved_objects,
            &self.cache_builds,
            &self.cache_builds_cancelled,
            &self.queries,
            &self.paths_found,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for SearchStats {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Summary statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchSummary {
    /// Objects whose references were enumerated
    pub objects_visited: u64,
    /// References enumerated
    pub edges_followed: u64,
    /// Objects skipped because their type did not resolve
    pub unresolved_objects: u64,
    /// Completed cache builds
    pub cache_builds: u64,
    /// Cancelled cache builds
    pub cache_builds_cancelled: u64,
    /// Queries started
    pub queries: u64,
    /// Paths and root paths produced
    pub paths_found: u64,
}

impl std::fmt::Display for SearchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SearchSummary {{ visited: {}, edges: {}, unresolved: {}, cache builds: {} ({} cancelled), queries: {}, paths: {} }}",
            self.objects_visited,
            self.edges_followed,
            self.unresolved_objects,
            self.cache_builds,
            self.cache_builds_cancelled,
            self.queries,
            self.paths_found
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let stats = SearchStats::new(true);
        stats.record_visit(3);
        stats.record_visit(2);
        stats.record_unresolved();
        stats.record_path();

        let summary = stats.summary();
        assert_eq!(summary.objects_visited, 2);
        assert_eq!(summary.edges_followed, 5);
        assert_eq!(summary.unresolved_objects, 1);
        assert_eq!(summary.paths_found, 1);

        stats.reset();
        assert_eq!(stats.summary(), SearchSummary::default());
    }

    #[test]
    fn test_disabled_stats_do_not_count() {
        let stats = SearchStats::new(false);
        stats.record_visit(10);
        stats.record_query();
        assert_eq!(stats.summary(), SearchSummary::default());
    }
}
