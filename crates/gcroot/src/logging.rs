//! Search Logging and Tracing
//!
//! Structured events for cache builds and queries, useful for:
//! - Seeing where time goes on large heaps
//! - Debugging unexpected "no roots" answers
//! - Spotting corrupt dumps (unresolved objects)
//!
//! Log Levels:
//! - WARN: Cancellations
//! - INFO: Cache lifecycle
//! - DEBUG: Query start/end
//! - TRACE: Per-object anomalies
//!
//! Library code also logs through the `log` facade; this module is the
//! opt-in structured channel enabled by `SearchConfig::verbose`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Log level for search events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Search event types
#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// Cache build started
    CacheBuildStart { roots: usize, workers: usize },

    /// Cache build completed
    CacheBuildEnd { objects: usize, duration_ms: f64 },

    /// Cache build cancelled; partial state discarded
    CacheBuildCancelled { visited: usize, duration_ms: f64 },

    /// Cache dropped
    CacheCleared { objects: usize },

    /// Query started
    QueryStart {
        query: &'static str,
        source: Option<u64>,
        target: u64,
        cached: bool,
    },

    /// Query finished producing results
    QueryEnd {
        query: &'static str,
        results: usize,
        duration_ms: f64,
    },

    /// Operation cancelled
    Cancelled { operation: &'static str },

    /// Object skipped because its type did not resolve
    UnresolvedObject { address: u64 },
}

/// Search logger configuration
#[derive(Debug, Clone)]
pub struct SearchLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,

    /// Events kept in memory; oldest dropped first
    pub max_events: usize,
}

impl Default for SearchLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: true,
            json: false,
            timestamps: true,
            max_events: 10_000,
        }
    }
}

/// Search logger - centralized logging for search operations
pub struct SearchLogger {
    config: SearchLoggerConfig,
    events: Mutex<VecDeque<(Instant, SearchEvent)>>,
    enabled: AtomicBool,
}

impl SearchLogger {
    /// Create new search logger
    pub fn new(config: SearchLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a search event
    pub fn log(&self, event: SearchEvent) {
        if !self.is_enabled() {
            return;
        }

        if Self::event_level(&event) > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        if let Ok(mut events) = self.events.lock() {
            if events.len() >= self.config.max_events {
                events.pop_front();
            }
            events.push_back((Instant::now(), event));
        }
    }

    /// Get log level for event
    fn event_level(event: &SearchEvent) -> LogLevel {
        match event {
            SearchEvent::Cancelled { .. } => LogLevel::Warn,
            SearchEvent::CacheBuildStart { .. }
            | SearchEvent::CacheBuildEnd { .. }
            | SearchEvent::CacheBuildCancelled { .. }
            | SearchEvent::CacheCleared { .. } => LogLevel::Info,
            SearchEvent::QueryStart { .. } | SearchEvent::QueryEnd { .. } => LogLevel::Debug,
            SearchEvent::UnresolvedObject { .. } => LogLevel::Trace,
        }
    }

    /// Output to console
    fn output_console(&self, event: &SearchEvent) {
        let line = if self.config.json {
            Self::format_json(event)
        } else {
            Self::format_human(event)
        };

        if self.config.timestamps {
            let now = chrono::Local::now();
            println!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), line);
        } else {
            println!("{}", line);
        }
    }

    /// Render in human-readable format
    pub fn format_human(event: &SearchEvent) -> String {
        match event {
            SearchEvent::CacheBuildStart { roots, workers } => {
                format!("[GCRoot] Cache build started ({} roots, {} workers)", roots, workers)
            },
            SearchEvent::CacheBuildEnd {
                objects,
                duration_ms,
            } => format!(
                "[GCRoot] Cache build completed ({} reachable objects, {:.2}ms)",
                objects, duration_ms
            ),
            SearchEvent::CacheBuildCancelled {
                visited,
                duration_ms,
            } => format!(
                "[GCRoot] Cache build cancelled after {} objects ({:.2}ms)",
                visited, duration_ms
            ),
            SearchEvent::CacheCleared { objects } => {
                format!("[GCRoot] Cache cleared ({} objects dropped)", objects)
            },
            SearchEvent::QueryStart {
                query,
                source,
                target,
                cached,
            } => match source {
                Some(source) => format!(
                    "[GCRoot] {} {:#x} -> {:#x} started (cached: {})",
                    query, source, target, cached
                ),
                None => format!(
                    "[GCRoot] {} for {:#x} started (cached: {})",
                    query, target, cached
                ),
            },
            SearchEvent::QueryEnd {
                query,
                results,
                duration_ms,
            } => format!(
                "[GCRoot] {} completed ({} results, {:.2}ms)",
                query, results, duration_ms
            ),
            SearchEvent::Cancelled { operation } => {
                format!("[GCRoot] {} cancelled", operation)
            },
            SearchEvent::UnresolvedObject { address } => {
                format!("[GCRoot] Object {:#x} has no resolvable type", address)
            },
        }
    }

    /// Render in JSON format
    pub fn format_json(event: &SearchEvent) -> String {
        let json = match event {
            SearchEvent::CacheBuildStart { roots, workers } => serde_json::json!({
                "type": "cache_build_start",
                "roots": roots,
                "workers": workers
            }),
            SearchEvent::CacheBuildEnd {
                objects,
                duration_ms,
            } => serde_json::json!({
                "type": "cache_build_end",
                "objects": objects,
                "duration_ms": duration_ms
            }),
            SearchEvent::CacheBuildCancelled {
                visited,
                duration_ms,
            } => serde_json::json!({
                "type": "cache_build_cancelled",
                "visited": visited,
                "duration_ms": duration_ms
            }),
            SearchEvent::CacheCleared { objects } => serde_json::json!({
                "type": "cache_cleared",
                "objects": objects
            }),
            SearchEvent::QueryStart {
                query,
                source,
                target,
                cached,
            } => serde_json::json!({
                "type": "query_start",
                "query": query,
                "source": source,
                "target": target,
                "cached": cached
            }),
            SearchEvent::QueryEnd {
                query,
                results,
                duration_ms,
            } => serde_json::json!({
                "type": "query_end",
                "query": query,
                "results": results,
                "duration_ms": duration_ms
            }),
            SearchEvent::Cancelled { operation } => serde_json::json!({
                "type": "cancelled",
                "operation": operation
            }),
            SearchEvent::UnresolvedObject { address } => serde_json::json!({
                "type": "unresolved_object",
                "address": address
            }),
        };

        json.to_string()
    }

    /// Get all events
    pub fn get_events(&self) -> Vec<(Instant, SearchEvent)> {
        if let Ok(events) = self.events.lock() {
            events.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    /// Clear all events
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        if let Ok(events) = self.events.lock() {
            events.len()
        } else {
            0
        }
    }
}

impl Default for SearchLogger {
    fn default() -> Self {
        Self::new(SearchLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<SearchLogger> = Mutex::new(SearchLogger::default());
}

/// Log a search event to the global logger
pub fn log_event(event: SearchEvent) {
    if let Ok(logger) = GLOBAL_LOGGER.lock() {
        logger.log(event);
    }
}

/// Configure global logger
pub fn configure_logger(config: SearchLoggerConfig) {
    if let Ok(mut logger) = GLOBAL_LOGGER.lock() {
        *logger = SearchLogger::new(config);
    }
}

/// Get global logger event count
pub fn get_event_count() -> usize {
    if let Ok(logger) = GLOBAL_LOGGER.lock() {
        logger.event_count()
    } else {
        0
    }
}
