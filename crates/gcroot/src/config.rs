//! Configuration Module - Search Tuning Parameters
//!
//! Controls how much parallelism root searches and cache builds may use and
//! how much they report about themselves.

/// Upper bound for the auto-detected worker count
const MAX_DEFAULT_WORKERS: usize = 8;

/// Configuration for [`RootSearch`](crate::search::RootSearch)
///
/// # Examples
///
/// ```rust
/// use gcroot::SearchConfig;
///
/// let config = SearchConfig {
///     worker_threads: Some(4),
///     allow_parallel_search: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Number of worker threads for cache builds and parallel queries
    ///
    /// `None` auto-detects min(8, num_cpus) each time the count is needed.
    /// `Some(1)` forces every traversal onto the calling thread.
    ///
    /// Default: `Some(min(8, num_cpus))`, detected once when the config is
    /// created
    pub worker_threads: Option<usize>,

    /// Let queries fan out across workers once a cache is built
    ///
    /// Queries never fan out without a cache, whatever this says.
    ///
    /// Default: false
    pub allow_parallel_search: bool,

    /// Minimum root count before a parallel root enumeration fans out
    ///
    /// Small root sets are walked on the calling thread.
    ///
    /// Default: 16
    pub parallel_root_threshold: usize,

    /// Emit structured search events to the global logger
    ///
    /// Default: false
    pub verbose: bool,

    /// Collect visit/edge/path counters
    ///
    /// Default: true
    pub stats_enabled: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            worker_threads: Some(default_workers()),
            allow_parallel_search: false,
            parallel_root_threshold: 16,
            verbose: false,
            stats_enabled: true,
        }
    }
}

impl SearchConfig {
    /// Validate configuration
    ///
    /// ```rust
    /// use gcroot::SearchConfig;
    ///
    /// let config = SearchConfig {
    ///     worker_threads: Some(0),
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(threads) = self.worker_threads {
            if threads == 0 {
                return Err(ConfigError::InvalidWorkerThreads(
                    "worker_threads must be > 0".to_string(),
                ));
            }
        }

        if self.parallel_root_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                "parallel_root_threshold must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with:
    /// - GCROOT_THREADS
    /// - GCROOT_PARALLEL
    /// - GCROOT_VERBOSE
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GCROOT_THREADS") {
            if let Ok(threads) = val.parse::<usize>() {
                config.worker_threads = Some(threads);
            }
        }

        if let Ok(val) = std::env::var("GCROOT_PARALLEL") {
            config.allow_parallel_search = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("GCROOT_VERBOSE") {
            config.verbose = parse_flag(&val);
        }

        config
    }

    /// Effective worker count, at least 1
    pub fn effective_workers(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(default_workers)
            .max(1)
    }
}

fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_WORKERS)
}

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid worker threads: {0}")]
    InvalidWorkerThreads(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.allow_parallel_search);
        assert!(config.stats_enabled);
        let workers = config.effective_workers();
        assert!((1..=MAX_DEFAULT_WORKERS).contains(&workers));
        assert_eq!(config.worker_threads, Some(workers));
    }

    #[test]
    fn test_unset_workers_auto_detect() {
        let config = SearchConfig {
            worker_threads: None,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_workers(), SearchConfig::default().effective_workers());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = SearchConfig {
            worker_threads: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkerThreads(_))
        ));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = SearchConfig {
            parallel_root_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("yes"));
    }
}
