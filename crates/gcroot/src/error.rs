//! Error Module - gcroot Error Types
//!
//! Defines the error types surfaced by root and path searches.
//!
//! # Error Categories
//!
//! ## Control Flow
//! - `Cancelled` - A cancellation token was signalled before or during an operation
//!
//! ## Setup Errors
//! - `Configuration` - Invalid search configuration
//! - `ThreadSpawn` - Worker thread could not be created
//! - `Snapshot` - Heap snapshot could not be read or parsed
//!
//! ## Bugs
//! - `Internal` - Invariant violation
//!
//! "No path" and "no roots" are not errors: they come back as empty results.
//! Inconsistent heap data (unresolvable referents, cycles) is absorbed by the
//! traversal and only shows up in [`SearchStats`](crate::stats::SearchStats).

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all gcroot operations
///
/// # Examples
///
/// ```rust
/// use gcroot::GcRootError;
///
/// fn describe(err: &GcRootError) -> String {
///     match err {
///         GcRootError::Cancelled { operation } => format!("{operation} was cancelled"),
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum GcRootError {
    /// Operation cancelled
    ///
    /// **When returned:** The supplied `CancellationToken` was signalled
    /// before the operation started or while it was traversing the heap.
    ///
    /// **Recovery strategy:** None inside the library. The caller decides
    /// whether to retry with a fresh token; a cancelled cache build leaves the
    /// search uncached and can be retried from scratch.
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: &'static str },

    /// Configuration error
    ///
    /// **When returned:** `SearchConfig::validate` rejected the configuration
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Worker thread could not be spawned
    ///
    /// **When returned:** The OS refused to create a cache-build worker.
    /// Root enumeration falls back to the calling thread instead.
    ///
    /// **Recovery strategy:** Retry with fewer `worker_threads`
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    /// Heap snapshot error
    ///
    /// **When returned:** A snapshot file could not be opened, mapped, or parsed
    #[error("Heap snapshot error: {0}")]
    Snapshot(String),

    /// Internal error - indicates a bug in gcroot
    ///
    /// **Action required:** Report with the heap snapshot that triggered it
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GcRootError {
    /// Create a cancellation error for `operation`
    pub fn cancelled(operation: &'static str) -> Self {
        GcRootError::Cancelled { operation }
    }

    /// Check if this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GcRootError::Cancelled { .. })
    }

    /// Check if retrying the operation can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GcRootError::Cancelled { .. } | GcRootError::ThreadSpawn(_)
        )
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(self, GcRootError::Internal(_))
    }
}

impl From<std::io::Error> for GcRootError {
    fn from(err: std::io::Error) -> Self {
        GcRootError::Snapshot(err.to_string())
    }
}

impl From<serde_json::Error> for GcRootError {
    fn from(err: serde_json::Error) -> Self {
        GcRootError::Snapshot(err.to_string())
    }
}

/// Result type alias for gcroot operations
pub type Result<T> = std::result::Result<T, GcRootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_classification() {
        let err = GcRootError::cancelled("build_cache");
        assert!(err.is_cancelled());
        assert!(err.is_recoverable());
        assert!(!err.is_bug());
        assert_eq!(err.to_string(), "Operation cancelled: build_cache");
    }

    #[test]
    fn test_internal_is_bug() {
        let err = GcRootError::Internal("parent chain loops".to_string());
        assert!(err.is_bug());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_io_error_becomes_snapshot_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "heap.json");
        let err: GcRootError = io.into();
        assert!(matches!(err, GcRootError::Snapshot(_)));
    }
}
