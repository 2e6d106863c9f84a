//! Configuration Module
//!
//! Handles loading startup settings from environment variables.

use std::env;
use std::time::Duration;

use crate::cache::{
    saturating_millis, CacheConfig, EvictionPolicy, Ttl, DEFAULT_MAINTENANCE_INTERVAL,
    DEFAULT_MAX_SIZE, DEFAULT_TTL,
};

/// Startup settings for a cache engine.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the cache can hold
    pub max_size: usize,
    /// Default TTL for entries without an explicit TTL
    pub default_ttl: Ttl,
    /// Eviction policy
    pub eviction_policy: EvictionPolicy,
    /// Upper bound on the delay between maintenance passes, in milliseconds
    pub maintenance_interval_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - Maximum cache entries (default: 100)
    /// - `CACHE_DEFAULT_TTL_MS` - Default TTL in milliseconds, or `none` for
    ///   no expiry (default: 3600000)
    /// - `CACHE_EVICTION_POLICY` - `LRU`, `FIFO` or `TTL` (default: LRU)
    /// - `CACHE_MAINTENANCE_INTERVAL_MS` - Maintenance cap (default: 5000)
    ///
    /// Values that fail to parse fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_size: env::var("CACHE_MAX_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&v: &usize| v > 0)
                .unwrap_or(defaults.max_size),
            default_ttl: env::var("CACHE_DEFAULT_TTL_MS")
                .ok()
                .and_then(|v| parse_ttl(&v))
                .unwrap_or(defaults.default_ttl),
            eviction_policy: env::var("CACHE_EVICTION_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.eviction_policy),
            maintenance_interval_ms: env::var("CACHE_MAINTENANCE_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.maintenance_interval_ms),
        }
    }

    /// The runtime configuration handed to the engine.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.max_size,
            default_ttl: self.default_ttl,
            eviction_policy: self.eviction_policy,
        }
    }

    /// Upper bound on the delay between maintenance passes.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

fn parse_ttl(raw: &str) -> Option<Ttl> {
    if raw.trim().eq_ignore_ascii_case("none") {
        return Some(Ttl::Never);
    }
    raw.trim()
        .parse::<u64>()
        .ok()
        .map(|ms| Ttl::After(Duration::from_millis(ms)))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_ttl: Ttl::After(DEFAULT_TTL),
            eviction_policy: EvictionPolicy::Lru,
            maintenance_interval_ms: saturating_millis(DEFAULT_MAINTENANCE_INTERVAL),
        }
    }
}
