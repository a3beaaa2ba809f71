//! Cache statistics types
//!
//! Counters kept by the cache coordinator for one context: where reads were
//! served from and how many tier operations failed.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of coordinator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads served by the volatile tier
    pub volatile_hits: u64,
    /// Reads served by the durable tier
    pub durable_hits: u64,
    /// Reads that found nothing usable
    pub misses: u64,
    /// Successful record writes (per tier)
    pub writes: u64,
    /// Tier operations that returned an error
    pub failures: u64,
}

impl CacheStats {
    /// Calculate hit rate (hits / total reads)
    /// Returns 0.0 if there are no reads
    pub fn hit_rate(&self) -> f64 {
        let hits = self.volatile_hits + self.durable_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Statistics tracker using atomics for thread safety
#[derive(Debug, Default)]
pub(crate) struct CacheStatsTracker {
    volatile_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    failures: AtomicU64,
}

impl CacheStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_volatile_hits(&self) {
        self.volatile_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_durable_hits(&self) {
        self.durable_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_misses(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_writes(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            volatile_hits: self.volatile_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
