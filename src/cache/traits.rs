//! Cache tier trait definition
//!
//! This module defines the `CacheTier` trait that both the volatile and the
//! durable tier implement. The engine never touches storage directly, only
//! through this contract.

use async_trait::async_trait;

use super::entry::CachedRecord;
use super::error::CacheError;

/// Operation reported to a `CacheObserver`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOperation {
    Get,
    Set,
    Remove,
    Clear,
}

/// Optional success/failure hook of a cache tier
pub trait CacheObserver: Send + Sync {
    fn on_success(&self, _op: TierOperation, _key: &str) {}

    fn on_failure(&self, _op: TierOperation, _key: &str, _error: &CacheError) {}
}

/// Storage contract shared by the volatile and the durable tier
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Get a record by key. Expiry is not checked here; the coordinator does that.
    async fn get(&self, key: &str) -> Result<Option<CachedRecord>, CacheError>;

    /// Store a record, overwriting any previous one
    async fn set(&self, key: &str, record: CachedRecord) -> Result<(), CacheError>;

    /// Remove a record. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every record
    async fn clear(&self) -> Result<(), CacheError>;

    /// Observer notified about every operation routed through the coordinator
    fn observer(&self) -> Option<&dyn CacheObserver> {
        None
    }
}
