//! Cooperative cancellation
//!
//! Every traversal checks its token once per object it dequeues, so a
//! signalled token is honoured within one object visit.

use crate::error::{GcRootError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

/// Shared cancellation flag
///
/// Clones observe the same flag. Deadlines are the caller's business: cancel
/// the token from a timer thread if one is needed.
///
/// # Examples
///
/// ```rust
/// use gcroot::CancellationToken;
///
/// let token = CancellationToken::new();
/// let observer = token.clone();
/// token.cancel();
/// assert!(observer.is_cancelled());
/// assert!(observer.check("enumerate_gc_roots").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Create a token that is not signalled
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for callers that never cancel
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a token that is signalled when either it or `self` is
    pub fn child(&self) -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Signal cancellation
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    /// Check whether this token or any ancestor was signalled
    pub fn is_cancelled(&self) -> bool {
        if self.state.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match &self.state.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// Return `Cancelled` for `operation` if the token was signalled
    #[inline]
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.is_cancelled() {
            Err(GcRootError::cancelled(operation))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check("find_single_path").is_ok());
    }

    #[test]
    fn test_clone_shares_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_check_names_operation() {
        let token = CancellationToken::new();
        token.cancel();
        match token.check("build_cache") {
            Err(GcRootError::Cancelled { operation }) => assert_eq!(operation, "build_cache"),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }
}
