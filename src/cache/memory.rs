//! In-process cache tiers
//!
//! This module provides in-memory cache tier implementations:
//! - `MemoryTier`: bounded volatile tier backed by moka
//! - `MapTier`: plain map, used as the durable tier when no directory is configured

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::entry::CachedRecord;
use super::error::CacheError;
use super::traits::{CacheObserver, CacheTier};
use crate::constants::DEFAULT_VOLATILE_CAPACITY;

/// MemoryTier wraps moka for our CacheTier trait
///
/// Expiry is per record and checked by the coordinator, so the moka cache is
/// only bounded by entry count.
pub struct MemoryTier {
    cache: moka::future::Cache<String, CachedRecord>,
    observer: Option<Arc<dyn CacheObserver>>,
}

impl MemoryTier {
    pub fn new(max_entries: u64) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_entries)
            .build();

        Self {
            cache,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Forces moka to process pending invalidations
    pub async fn run_pending(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Current entry count (approximate due to eventual consistency)
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(DEFAULT_VOLATILE_CAPACITY)
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<CachedRecord>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn set(&self, key: &str, record: CachedRecord) -> Result<(), CacheError> {
        self.cache.insert(key.to_string(), record).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        // Entries inserted before this call are no longer visible to get()
        self.cache.invalidate_all();
        Ok(())
    }

    fn observer(&self) -> Option<&dyn CacheObserver> {
        self.observer.as_deref()
    }
}

/// Map-backed tier with no eviction
#[derive(Default)]
pub struct MapTier {
    entries: RwLock<HashMap<String, CachedRecord>>,
    observer: Option<Arc<dyn CacheObserver>>,
}

impl MapTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }
}

#[async_trait]
impl CacheTier for MapTier {
    async fn get(&self, key: &str) -> Result<Option<CachedRecord>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, record: CachedRecord) -> Result<(), CacheError> {
        self.entries.write().insert(key.to_string(), record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().clear();
        Ok(())
    }

    fn observer(&self) -> Option<&dyn CacheObserver> {
        self.observer.as_deref()
    }
}
