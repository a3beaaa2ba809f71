//! Cache policy types
//!
//! - `CacheOptions`: serde-friendly per-verb / per-descriptor cache settings
//! - `CachePolicy`: fully resolved policy frozen into a descriptor
//! - `ReadScope`: which tiers a cache read consults

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a cached value relates to the durable tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Volatile tier only
    #[default]
    Memory,
    /// Persisted; a valid durable entry is a real cache hit (no refetch)
    Restore,
    /// Persisted; a durable entry only paints the data state, a fresh request is always sent
    Placeholder,
}

/// Which tiers a cache read may consult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadScope {
    /// Volatile tier only
    L1,
    /// Durable tier only (subject to tag match)
    L2,
    /// Volatile first, then durable when the policy persists
    #[default]
    All,
}

/// When a cached value stops being valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expire {
    /// Never expires
    Never,
    /// Expires this many milliseconds after it is written. `After(0)` disables caching.
    After(u64),
    /// Expires at an absolute point in time
    At(DateTime<Utc>),
}

/// Cache settings as they appear in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheOptions {
    #[serde(default)]
    pub mode: CacheMode,
    /// Lifetime in milliseconds. None = never expires, 0 = do not cache.
    #[serde(default)]
    pub expire_ms: Option<u64>,
    /// Durable entries written with a different tag are treated as absent
    #[serde(default)]
    pub tag: Option<String>,
}

impl CacheOptions {
    /// Cache in memory for `ms` milliseconds
    pub fn memory(ms: u64) -> Self {
        Self {
            mode: CacheMode::Memory,
            expire_ms: Some(ms),
            tag: None,
        }
    }

    pub fn disabled() -> Self {
        Self::memory(0)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(tag) = &self.tag {
            if tag.is_empty() {
                return Err("cache tag cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

/// Resolved cache policy of one descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    pub mode: CacheMode,
    pub expire: Expire,
    pub tag: Option<String>,
}

impl CachePolicy {
    pub fn disabled() -> Self {
        Self {
            mode: CacheMode::Memory,
            expire: Expire::After(0),
            tag: None,
        }
    }

    /// A persisted policy (`Restore` or `Placeholder`) writes the durable tier
    pub fn persists(&self) -> bool {
        matches!(self.mode, CacheMode::Restore | CacheMode::Placeholder)
    }

    /// Absolute expiry for a value written at `now_ms`. None = never.
    pub fn expires_at(&self, now_ms: u64) -> Option<u64> {
        match self.expire {
            Expire::Never => None,
            Expire::After(ms) => Some(now_ms.saturating_add(ms)),
            Expire::At(at) => Some(at.timestamp_millis().max(0) as u64),
        }
    }

    /// True when a value written at `now_ms` would already be stale
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at(now_ms) {
            Some(expires_at) => expires_at <= now_ms,
            None => false,
        }
    }
}

impl From<&CacheOptions> for CachePolicy {
    fn from(options: &CacheOptions) -> Self {
        Self {
            mode: options.mode,
            expire: match options.expire_ms {
                Some(ms) => Expire::After(ms),
                None => Expire::Never,
            },
            tag: options.tag.clone(),
        }
    }
}
