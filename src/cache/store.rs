//! Cache Store Module
//!
//! Single-owner bookkeeping behind the engine: entry storage, access records,
//! the expiry index, eviction, and counters. Every method takes the current
//! time explicitly; locking and clocks live in the engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::cache::{
    AccessLog, CacheConfig, CacheEntry, CacheKey, CacheStats, ConfigUpdate, Counters,
    EvictionPolicy, Ttl,
};
use crate::error::Result;

// == Cache Store ==
/// Memoized results with TTL expiration and policy-driven eviction.
///
/// The keys of `entries` and `access` are always the same set.
#[derive(Debug)]
pub struct CacheStore<V> {
    /// Key-value storage
    entries: HashMap<CacheKey, CacheEntry<V>>,
    /// Access and insertion order tracker
    access: AccessLog,
    /// Entries with a finite TTL, ordered by `(expires_at, sequence)`
    expiries: BTreeMap<(u64, u64), CacheKey>,
    /// Performance counters
    counters: Counters,
    /// Active configuration
    config: CacheConfig,
    /// Next insertion sequence number
    next_sequence: u64,
}

impl<V> CacheStore<V> {
    // == Constructor ==
    /// Creates an empty store with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            access: AccessLog::new(),
            expiries: BTreeMap::new(),
            counters: Counters::new(),
            config,
            next_sequence: 0,
        }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    // == Configure ==
    /// Applies a partial update, all or nothing.
    ///
    /// Stored entries are left as they are; a smaller `max_size` takes effect
    /// on the next insertion or maintenance pass.
    pub fn configure(&mut self, update: &ConfigUpdate) -> Result<CacheConfig> {
        self.config = self.config.apply(update)?;
        Ok(self.config)
    }

    // == Lookup ==
    /// Returns the live value for `key` and records a hit.
    ///
    /// An expired entry is removed and reported as absent. Misses are not
    /// recorded here; the caller records one when it commits to computing.
    pub fn lookup(&mut self, key: &CacheKey, now: u64) -> Option<Arc<V>> {
        let expired = self.entries.get(key)?.is_expired_at(now);

        if expired {
            self.remove_entry(key);
            self.counters.record_expirations(1);
            debug!("Lazily expired {}", key);
            return None;
        }

        self.counters.record_hit();
        self.access.touch(key, now);
        self.entries.get(key).map(CacheEntry::value)
    }

    // == Record Miss ==
    /// Counts one call that had to invoke its compute function.
    pub fn record_miss(&mut self) {
        self.counters.record_miss();
    }

    // == Insert ==
    /// Stores a freshly computed value and restores the size bound.
    ///
    /// # Arguments
    /// * `key` - Key of the computation
    /// * `value` - The computed value
    /// * `ttl` - Per-call TTL, or None for the configured default
    /// * `now` - Write time in Unix milliseconds
    ///
    /// # Returns
    /// A shared handle to the stored value, even if the entry was evicted
    /// again straight away.
    pub fn insert(&mut self, key: CacheKey, value: V, ttl: Option<Ttl>, now: u64) -> Arc<V> {
        // A new write starts a fresh lifecycle for the key
        self.remove_entry(&key);

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let expires_at = ttl.unwrap_or(self.config.default_ttl).expires_at(now);
        let value = Arc::new(value);

        if let Some(expires) = expires_at {
            self.expiries.insert((expires, sequence), key.clone());
        }
        self.access.record_insert(&key, sequence, now);
        self.entries.insert(
            key,
            CacheEntry::new(Arc::clone(&value), sequence, expires_at),
        );

        self.evict_to_capacity(now);
        value
    }

    // == Peek ==
    /// Returns the stored value without touching statistics, access records,
    /// or expired entries.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<V>> {
        self.entries.get(key).map(CacheEntry::value)
    }

    // == Remove ==
    /// Removes one entry. Returns true if it was present.
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        self.remove_entry(key).is_some()
    }

    // == Clear ==
    /// Drops every entry and access record. Counters are kept.
    ///
    /// Returns the number of entries dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.access.clear();
        self.expiries.clear();
        count
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let counters = self.counters;
        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            expirations: counters.expirations,
            size: self.entries.len(),
            hit_ratio: CacheStats::hit_rate(counters.hits, counters.misses),
            eviction_policy: self.config.eviction_policy,
            max_size: self.config.max_size,
            default_ttl_ms: self.config.default_ttl.as_millis(),
        }
    }

    // == Purge Expired ==
    /// Removes all expired entries.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let expired = self.expired_keys(now);
        let count = self.remove_all(&expired);
        self.counters.record_expirations(count);
        count
    }

    // == Evict To Capacity ==
    /// Removes `len - max_size` entries according to the active policy.
    ///
    /// Under the TTL policy every expired entry is evicted first, which may
    /// remove more than strictly needed, and any remaining excess falls back
    /// to LRU order.
    ///
    /// Returns the number of entries evicted.
    pub fn evict_to_capacity(&mut self, now: u64) -> usize {
        if self.entries.len() <= self.config.max_size {
            return 0;
        }

        let evicted = match self.config.eviction_policy {
            EvictionPolicy::Lru => {
                let victims = self.access.least_recent(self.excess());
                self.remove_all(&victims)
            }
            EvictionPolicy::Fifo => {
                let victims = self.access.oldest_inserted(self.excess());
                self.remove_all(&victims)
            }
            EvictionPolicy::Ttl => {
                let expired = self.expired_keys(now);
                let mut evicted = self.remove_all(&expired);
                let victims = self.access.least_recent(self.excess());
                evicted += self.remove_all(&victims);
                evicted
            }
        };

        self.counters.record_evictions(evicted);
        debug!(
            "Evicted {} entries under {} policy, {} remain",
            evicted,
            self.config.eviction_policy,
            self.entries.len()
        );
        evicted
    }

    // == Needs Maintenance ==
    /// True while a background sweep has something to watch: entries with a
    /// finite TTL, or a store at 90% of its capacity or more.
    pub fn needs_maintenance(&self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        !self.expiries.is_empty()
            || self.entries.len().saturating_mul(10) >= self.config.max_size.saturating_mul(9)
    }

    // == Length ==
    /// Returns the current number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when an entry for `key` is stored, expired or not.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the access log, for inspection.
    pub fn access_log(&self) -> &AccessLog {
        &self.access
    }

    fn excess(&self) -> usize {
        self.entries.len().saturating_sub(self.config.max_size)
    }

    fn expired_keys(&self, now: u64) -> Vec<CacheKey> {
        self.expiries
            .range(..=(now, u64::MAX))
            .map(|(_, key)| key.clone())
            .collect()
    }

    fn remove_all(&mut self, keys: &[CacheKey]) -> usize {
        keys.iter()
            .filter(|key| self.remove_entry(key).is_some())
            .count()
    }

    fn remove_entry(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.access.remove(key);
        if let Some(expires) = entry.expires_at {
            self.expiries.remove(&(expires, entry.sequence));
        }
        Some(entry)
    }
}
