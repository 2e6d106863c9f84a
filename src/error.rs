//! Error types for the memoization engine
//!
//! Provides unified error handling using thiserror. Failures raised by a
//! caller's compute function are never wrapped in this type; they travel back
//! to the caller untouched.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A configuration value failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A cache key could not be derived from the function name and arguments
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
