//! Access Log Module
//!
//! Tracks when each live entry was last read or written, and in what order
//! entries were inserted, for LRU and FIFO victim selection.

use std::collections::{BTreeMap, HashMap};

use crate::cache::CacheKey;

// == Access Record ==
/// Last access time of one live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
    /// Timestamp of the most recent read or write (Unix milliseconds)
    pub last_access: u64,
    /// Insertion sequence of the entry, used to break timestamp ties
    pub sequence: u64,
}

// == Access Log ==
/// One `AccessRecord` per live entry plus two ordered indexes.
///
/// - `by_access` orders keys by `(last_access, sequence)`, oldest first
/// - `by_insertion` orders keys by `sequence`, oldest first
#[derive(Debug, Default)]
pub struct AccessLog {
    records: HashMap<CacheKey, AccessRecord>,
    by_access: BTreeMap<(u64, u64), CacheKey>,
    by_insertion: BTreeMap<u64, CacheKey>,
}

impl AccessLog {
    // == Constructor ==
    /// Creates a new empty access log.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Insert ==
    /// Starts tracking a freshly inserted entry.
    ///
    /// Any record left over for the same key is replaced.
    pub fn record_insert(&mut self, key: &CacheKey, sequence: u64, now: u64) {
        self.remove(key);

        let record = AccessRecord {
            last_access: now,
            sequence,
        };
        self.by_access.insert((now, sequence), key.clone());
        self.by_insertion.insert(sequence, key.clone());
        self.records.insert(key.clone(), record);
    }

    // == Touch ==
    /// Marks a key as read at `now`. Unknown keys are ignored.
    pub fn touch(&mut self, key: &CacheKey, now: u64) {
        if let Some(record) = self.records.get_mut(key) {
            // Clocks can step backwards; never move a record into the past
            let at = now.max(record.last_access);
            if let Some(k) = self.by_access.remove(&(record.last_access, record.sequence)) {
                self.by_access.insert((at, record.sequence), k);
            }
            record.last_access = at;
        }
    }

    // == Remove ==
    /// Removes a key from the log.
    pub fn remove(&mut self, key: &CacheKey) -> Option<AccessRecord> {
        let record = self.records.remove(key)?;
        self.by_access.remove(&(record.last_access, record.sequence));
        self.by_insertion.remove(&record.sequence);
        Some(record)
    }

    // == Least Recent ==
    /// Returns up to `count` keys, least recently accessed first.
    ///
    /// Entries accessed at the same millisecond come out in insertion order.
    pub fn least_recent(&self, count: usize) -> Vec<CacheKey> {
        self.by_access.values().take(count).cloned().collect()
    }

    // == Oldest Inserted ==
    /// Returns up to `count` keys in insertion order.
    pub fn oldest_inserted(&self, count: usize) -> Vec<CacheKey> {
        self.by_insertion.values().take(count).cloned().collect()
    }

    /// Returns the record for a key.
    pub fn get(&self, key: &CacheKey) -> Option<&AccessRecord> {
        self.records.get(key)
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Checks if a key is being tracked.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.records.contains_key(key)
    }

    /// Forgets every key.
    pub fn clear(&mut self) {
        self.records.clear();
        self.by_access.clear();
        self.by_insertion.clear();
    }
}
