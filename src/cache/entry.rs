//! Cache record type
//!
//! Both tiers store the same `CachedRecord`: the cached data, an absolute
//! expiry timestamp (milliseconds since the UNIX epoch, `None` = never
//! expires) and an optional tag. On the wire the record is the 3-tuple
//! `[data, expiry|null, tag|null]` so durable adapters can persist it with
//! any serde format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached value as stored in a cache tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordTuple", into = "RecordTuple")]
pub struct CachedRecord {
    /// The cached (already transformed) response data
    pub data: Value,
    /// Absolute expiry in ms since epoch, None means the record never expires
    pub expires_at: Option<u64>,
    /// Tag the record was written with (durable tier only)
    pub tag: Option<String>,
}

type RecordTuple = (Value, Option<u64>, Option<String>);

impl From<RecordTuple> for CachedRecord {
    fn from((data, expires_at, tag): RecordTuple) -> Self {
        Self {
            data,
            expires_at,
            tag,
        }
    }
}

impl From<CachedRecord> for RecordTuple {
    fn from(record: CachedRecord) -> Self {
        (record.data, record.expires_at, record.tag)
    }
}

impl CachedRecord {
    pub fn new(data: Value, expires_at: Option<u64>, tag: Option<String>) -> Self {
        Self {
            data,
            expires_at,
            tag,
        }
    }

    /// A record is valid while `now < expires_at` (or forever without expiry)
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_ms >= expires_at,
            None => false,
        }
    }
}
