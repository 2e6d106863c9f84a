//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::sync::Arc;

// == Cache Entry ==
/// Represents a single memoized result with its metadata.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The stored value, handed out as shared immutable clones
    value: Arc<V>,
    /// Insertion sequence number, unique per store
    pub sequence: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry.
    ///
    /// # Arguments
    /// * `value` - The computed value
    /// * `sequence` - Position in insertion order
    /// * `expires_at` - Absolute expiry, or None to keep it until evicted
    pub fn new(value: Arc<V>, sequence: u64, expires_at: Option<u64>) -> Self {
        Self {
            value,
            sequence,
            expires_at,
        }
    }

    /// Returns a shared handle to the stored value.
    pub fn value(&self) -> Arc<V> {
        Arc::clone(&self.value)
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is expired once the current time is
    /// greater than or equal to its expiration time, so a zero TTL produces an
    /// entry that is already expired for every later lookup.
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }
}
