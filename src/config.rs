//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Sliding expiration applied by `Cache::get` when no policy is given
    pub default_sliding_expiration: Duration,
    /// Interval between background sweeps of expired entries
    pub cleanup_interval: Duration,
    /// Refresh intervals below this are treated as disabled
    pub min_refresh_interval: Duration,
    /// Minimum spacing between two refresh attempts of the same entry
    pub refresh_retry_spacing: Duration,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_SLIDING_SECS` - Default sliding expiration (default: 300)
    /// - `CACHE_CLEANUP_INTERVAL_SECS` - Cleanup frequency in seconds (default: 1)
    /// - `CACHE_MIN_REFRESH_INTERVAL_MS` - Smallest honoured refresh interval (default: 1000)
    /// - `CACHE_REFRESH_RETRY_SPACING_MS` - Refresh retry throttle (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_sliding_expiration: env_u64("CACHE_DEFAULT_SLIDING_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_sliding_expiration),
            cleanup_interval: env_u64("CACHE_CLEANUP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            min_refresh_interval: env_u64("CACHE_MIN_REFRESH_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_refresh_interval),
            refresh_retry_spacing: env_u64("CACHE_REFRESH_RETRY_SPACING_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.refresh_retry_spacing),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_sliding_expiration: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(1),
            min_refresh_interval: Duration::from_secs(1),
            refresh_retry_spacing: Duration::from_secs(1),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.default_sliding_expiration, Duration::from_secs(300));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));
        assert_eq!(config.min_refresh_interval, Duration::from_secs(1));
        assert_eq!(config.refresh_retry_spacing, Duration::from_secs(1));
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_DEFAULT_SLIDING_SECS");
        env::remove_var("CACHE_CLEANUP_INTERVAL_SECS");
        env::remove_var("CACHE_MIN_REFRESH_INTERVAL_MS");
        env::remove_var("CACHE_REFRESH_RETRY_SPACING_MS");

        let config = CacheConfig::from_env();
        assert_eq!(config.default_sliding_expiration, Duration::from_secs(300));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));
        assert_eq!(config.min_refresh_interval, Duration::from_millis(1000));
        assert_eq!(config.refresh_retry_spacing, Duration::from_millis(1000));
    }
}
