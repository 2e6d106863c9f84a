//! Cache Module
//!
//! Provides in-memory memoization with TTL expiration and LRU, FIFO or
//! TTL-aware eviction.

mod access;
mod engine;
mod entry;
mod key;
mod options;
mod stats;
mod store;


// Re-export public types
pub use access::{AccessLog, AccessRecord};
pub use engine::{CacheEngine, DEFAULT_MAINTENANCE_INTERVAL, MIN_MAINTENANCE_INTERVAL};
pub use entry::CacheEntry;
pub use key::CacheKey;
pub(crate) use options::saturating_millis;
pub use options::{
    CacheConfig, ConfigUpdate, EvictionPolicy, ExecuteOptions, Ttl, DEFAULT_MAX_SIZE, DEFAULT_TTL,
};
pub use stats::{CacheStats, Counters};
pub use store::CacheStore;

// == Public Constants ==
/// Maximum allowed function name length in bytes
pub const MAX_FUNCTION_NAME_LENGTH: usize = 256;
