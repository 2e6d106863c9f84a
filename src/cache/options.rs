//! Cache Options Module
//!
//! Runtime configuration of the engine, the partial updates accepted by
//! `configure`, and per-call execute options.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CacheError, Result};

// == Defaults ==
/// Default maximum number of entries
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Default time-to-live (one hour)
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

// == Eviction Policy ==
/// Strategy used to pick victims when the store grows past `max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Least recently used entries go first
    #[default]
    #[serde(rename = "LRU")]
    Lru,
    /// Oldest inserted entries go first, regardless of access
    #[serde(rename = "FIFO")]
    Fifo,
    /// Expired entries go first, then least recently used
    #[serde(rename = "TTL")]
    Ttl,
}

impl EvictionPolicy {
    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Fifo => "FIFO",
            EvictionPolicy::Ttl => "TTL",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LRU" => Ok(EvictionPolicy::Lru),
            "FIFO" => Ok(EvictionPolicy::Fifo),
            "TTL" => Ok(EvictionPolicy::Ttl),
            _ => Err(CacheError::InvalidConfig(format!(
                "invalid eviction policy '{}', must be one of: LRU, FIFO, TTL",
                s
            ))),
        }
    }
}

// == Ttl ==
/// How long an entry stays live after it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The entry never expires
    Never,
    /// The entry expires once this much time has passed
    After(Duration),
}

impl Ttl {
    /// Absolute expiry for an entry written at `now_ms`, or `None` for `Never`.
    pub fn expires_at(&self, now_ms: u64) -> Option<u64> {
        match self {
            Ttl::Never => None,
            Ttl::After(ttl) => Some(now_ms.saturating_add(saturating_millis(*ttl))),
        }
    }

    /// Length in milliseconds, or `None` for `Never`.
    pub fn as_millis(&self) -> Option<u64> {
        match self {
            Ttl::Never => None,
            Ttl::After(ttl) => Some(saturating_millis(*ttl)),
        }
    }
}

/// Whole milliseconds in `duration`, clamped to `u64::MAX`.
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<Duration> for Ttl {
    fn from(ttl: Duration) -> Self {
        Ttl::After(ttl)
    }
}

// == Cache Config ==
/// Runtime configuration of a cache engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries kept after eviction
    pub max_size: usize,
    /// TTL applied when a call does not pass its own
    pub default_ttl: Ttl,
    /// Victim selection strategy
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_ttl: Ttl::After(DEFAULT_TTL),
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

impl CacheConfig {
    /// Checks the invariants a configuration must hold.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::InvalidConfig(
                "maxSize must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    // == Apply ==
    /// Returns a copy of this configuration with `update` applied.
    ///
    /// Every supplied field is validated before anything is returned, so a
    /// single bad field rejects the whole update.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<CacheConfig> {
        let mut next = *self;

        if let Some(max_size) = update.max_size {
            if max_size <= 0 {
                return Err(CacheError::InvalidConfig(format!(
                    "maxSize must be a positive integer, got {}",
                    max_size
                )));
            }
            next.max_size = usize::try_from(max_size).map_err(|_| {
                CacheError::InvalidConfig(format!("maxSize {} is too large", max_size))
            })?;
        }

        if let Some(default_ttl) = update.default_ttl {
            next.default_ttl = match default_ttl {
                None => Ttl::Never,
                Some(ms) if ms < 0 => {
                    return Err(CacheError::InvalidConfig(format!(
                        "defaultTTL must be non-negative, got {}",
                        ms
                    )));
                }
                Some(ms) => Ttl::After(Duration::from_millis(ms as u64)),
            };
        }

        if let Some(policy) = &update.eviction_policy {
            next.eviction_policy = policy.parse()?;
        }

        next.validate()?;
        Ok(next)
    }
}

// == Config Update ==
/// A partial configuration change, as accepted by `configure`.
///
/// Fields are kept in their raw form so that out-of-range values reach
/// validation instead of being unrepresentable. In JSON, an absent
/// `defaultTTL` leaves the TTL alone while `null` disables expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigUpdate {
    /// New maximum size
    #[serde(default)]
    pub max_size: Option<i64>,
    /// New default TTL in milliseconds; `Some(None)` means no expiry
    #[serde(default, rename = "defaultTTL", deserialize_with = "present")]
    pub default_ttl: Option<Option<i64>>,
    /// New eviction policy name
    #[serde(default)]
    pub eviction_policy: Option<String>,
}

/// Marks a field as present even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ConfigUpdate {
    /// Creates an update that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an update from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CacheError::InvalidConfig(format!("malformed configuration: {}", e)))
    }

    /// Sets the new maximum size.
    pub fn max_size(mut self, max_size: i64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Sets the new default TTL in milliseconds.
    pub fn default_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.default_ttl = Some(Some(ttl_ms));
        self
    }

    /// Sets the new default TTL, `Ttl::Never` disabling expiry.
    pub fn default_ttl(mut self, ttl: Ttl) -> Self {
        self.default_ttl = Some(ttl.as_millis().map(|ms| ms.min(i64::MAX as u64) as i64));
        self
    }

    /// Sets the new eviction policy by name.
    pub fn eviction_policy(mut self, policy: impl Into<String>) -> Self {
        self.eviction_policy = Some(policy.into());
        self
    }
}

// == Execute Options ==
/// Per-call options for `execute`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// TTL for this entry; `None` falls back to the configured default
    pub ttl: Option<Ttl>,
}

impl ExecuteOptions {
    /// Expire the entry after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(Ttl::After(ttl)),
        }
    }

    /// Keep the entry until it is evicted or cleared.
    pub fn no_expiry() -> Self {
        Self {
            ttl: Some(Ttl::Never),
        }
    }
}
