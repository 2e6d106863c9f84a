//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.
//! Counters are monotonic and survive `clear()`.

use serde::Serialize;

use crate::cache::EvictionPolicy;

// == Counters ==
/// Running counters owned by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to invoke the compute function
    pub misses: u64,
    /// Entries removed to restore the size bound
    pub evictions: u64,
    /// Entries removed because their TTL passed
    pub expirations: u64,
}

impl Counters {
    // == Constructor ==
    /// Creates a new set of counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Hit ==
    /// Counts one call answered from the cache.
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    // == Record Miss ==
    /// Counts one call that invoked its compute function.
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Eviction ==
    /// Adds `count` entries removed by the size bound.
    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    // == Record Expiration ==
    /// Adds `count` entries removed after their TTL passed.
    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }
}

// == Cache Stats ==
/// Immutable snapshot of engine statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of computations performed (including failed ones)
    pub misses: u64,
    /// Number of entries evicted by the size bound
    pub evictions: u64,
    /// Number of entries dropped after their TTL passed
    pub expirations: u64,
    /// Stored entries, including expired ones not yet purged
    pub size: usize,
    /// hits / (hits + misses), 0 when nothing was looked up
    pub hit_ratio: f64,
    /// Active eviction policy
    pub eviction_policy: EvictionPolicy,
    /// Configured maximum size
    pub max_size: usize,
    /// Configured default TTL in milliseconds, None = no expiry
    #[serde(rename = "defaultTTL")]
    pub default_ttl_ms: Option<u64>,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
