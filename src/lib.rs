//! Memo Cache - An in-memory memoization engine
//!
//! Caches the results of expensive computations with TTL expiration and
//! LRU, FIFO or TTL-aware eviction.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{
    CacheConfig, CacheEngine, CacheKey, CacheStats, ConfigUpdate, EvictionPolicy, ExecuteOptions,
    Ttl,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::MaintenanceReport;
