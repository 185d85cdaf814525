//! Search Timer - Timing Utilities
//!
//! Times cache builds and queries for log events.

use std::time::{Duration, Instant};

/// SearchTimer - timer for measuring search operations
#[derive(Debug, Clone, Copy)]
pub struct SearchTimer {
    start: Instant,
}

impl SearchTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }

    /// Get elapsed milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for SearchTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_monotonic() {
        let timer = SearchTimer::new();
        let first = timer.elapsed();
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.elapsed() > first);
        assert!(timer.elapsed_ms() >= 2.0);
    }
}
