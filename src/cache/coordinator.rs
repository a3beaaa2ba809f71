//! Cache coordinator
//!
//! Derives per-descriptor cache behaviour from its `CachePolicy` and keeps the
//! volatile and durable tiers consistent:
//! - reads with TTL/tag checks and proactive removal of stale records
//! - `restore` promotion from the durable tier into the volatile tier
//! - writes to one or both tiers
//! - explicit and dependency-based invalidation
//!
//! Tier failures never leave this module. They are reported to the tier's
//! observer, logged at `warn` and treated as a miss or a skipped write.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::entry::CachedRecord;
use super::policy::{CacheMode, CachePolicy, ReadScope};
use super::stats::{CacheStats, CacheStatsTracker};
use super::traits::{CacheTier, TierOperation};
use crate::clock::Clock;
use crate::config::AutoInvalidateScope;
use crate::constants::{DURABLE_KEY_PREFIX, TIER_KEY_SEPARATOR};
use crate::method::Method;
use crate::snapshot::SnapshotRegistry;

/// Which tier an operation targets, used for logging
#[derive(Debug, Clone, Copy)]
enum TierKind {
    Volatile,
    Durable,
}

impl TierKind {
    fn as_str(self) -> &'static str {
        match self {
            TierKind::Volatile => "volatile",
            TierKind::Durable => "durable",
        }
    }
}

/// Cache coordinator of one context
pub struct CacheCoordinator {
    context_id: String,
    volatile: Arc<dyn CacheTier>,
    durable: Arc<dyn CacheTier>,
    clock: Arc<dyn Clock>,
    stats: CacheStatsTracker,
    // Serializes read-modify-write sequences against plain writes
    update_gate: tokio::sync::Mutex<()>,
}

impl CacheCoordinator {
    pub fn new(
        context_id: impl Into<String>,
        volatile: Arc<dyn CacheTier>,
        durable: Arc<dyn CacheTier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            volatile,
            durable,
            clock,
            stats: CacheStatsTracker::new(),
            update_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn volatile_key(&self, key: &str) -> String {
        format!("{}{}{}", self.context_id, TIER_KEY_SEPARATOR, key)
    }

    fn durable_key(&self, key: &str) -> String {
        format!(
            "{}{}{}{}",
            DURABLE_KEY_PREFIX, self.context_id, TIER_KEY_SEPARATOR, key
        )
    }

    fn tier(&self, kind: TierKind) -> &dyn CacheTier {
        match kind {
            TierKind::Volatile => self.volatile.as_ref(),
            TierKind::Durable => self.durable.as_ref(),
        }
    }

    // ========================================================================
    // Tier access with error swallowing
    // ========================================================================

    async fn tier_get(&self, kind: TierKind, key: &str) -> Option<CachedRecord> {
        let tier = self.tier(kind);
        match tier.get(key).await {
            Ok(record) => {
                if let Some(observer) = tier.observer() {
                    observer.on_success(TierOperation::Get, key);
                }
                record
            }
            Err(err) => {
                self.stats.increment_failures();
                warn!(tier = kind.as_str(), key = %key, error = %err, "Cache read failed");
                if let Some(observer) = tier.observer() {
                    observer.on_failure(TierOperation::Get, key, &err);
                }
                None
            }
        }
    }

    async fn tier_set(&self, kind: TierKind, key: &str, record: CachedRecord) -> bool {
        let tier = self.tier(kind);
        match tier.set(key, record).await {
            Ok(()) => {
                self.stats.increment_writes();
                if let Some(observer) = tier.observer() {
                    observer.on_success(TierOperation::Set, key);
                }
                true
            }
            Err(err) => {
                self.stats.increment_failures();
                warn!(tier = kind.as_str(), key = %key, error = %err, "Cache write failed");
                if let Some(observer) = tier.observer() {
                    observer.on_failure(TierOperation::Set, key, &err);
                }
                false
            }
        }
    }

    async fn tier_remove(&self, kind: TierKind, key: &str) {
        let tier = self.tier(kind);
        match tier.remove(key).await {
            Ok(()) => {
                if let Some(observer) = tier.observer() {
                    observer.on_success(TierOperation::Remove, key);
                }
            }
            Err(err) => {
                self.stats.increment_failures();
                warn!(tier = kind.as_str(), key = %key, error = %err, "Cache remove failed");
                if let Some(observer) = tier.observer() {
                    observer.on_failure(TierOperation::Remove, key, &err);
                }
            }
        }
    }

    async fn tier_clear(&self, kind: TierKind) {
        let tier = self.tier(kind);
        match tier.clear().await {
            Ok(()) => {
                if let Some(observer) = tier.observer() {
                    observer.on_success(TierOperation::Clear, "");
                }
            }
            Err(err) => {
                self.stats.increment_failures();
                warn!(tier = kind.as_str(), error = %err, "Cache clear failed");
                if let Some(observer) = tier.observer() {
                    observer.on_failure(TierOperation::Clear, "", &err);
                }
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    async fn read_volatile(&self, key: &str) -> Option<Value> {
        let tier_key = self.volatile_key(key);
        let record = self.tier_get(TierKind::Volatile, &tier_key).await?;
        if record.is_expired(self.clock.now_ms()) {
            self.tier_remove(TierKind::Volatile, &tier_key).await;
            return None;
        }
        Some(record.data)
    }

    async fn read_durable(&self, key: &str, policy: &CachePolicy) -> Option<CachedRecord> {
        let tier_key = self.durable_key(key);
        let record = self.tier_get(TierKind::Durable, &tier_key).await?;
        if record.is_expired(self.clock.now_ms()) || record.tag != policy.tag {
            debug!(key = %key, "Dropping stale durable cache record");
            self.tier_remove(TierKind::Durable, &tier_key).await;
            return None;
        }
        Some(record)
    }

    /// Read a descriptor's cached value
    ///
    /// `L1` reads the volatile tier, `L2` the durable tier (tag must match).
    /// `All` reads the volatile tier and falls back to the durable tier when the
    /// policy persists and has not expired; a `restore` hit found there is
    /// promoted into the volatile tier.
    pub async fn read(&self, method: &Method, scope: ReadScope) -> Option<Value> {
        let policy = method.cache_policy();
        let key = method.key();

        let value = match scope {
            ReadScope::L1 => self.read_volatile(key).await,
            ReadScope::L2 => self.read_durable(key, policy).await.map(|r| r.data),
            ReadScope::All => match self.read_volatile(key).await {
                Some(value) => Some(value),
                None if policy.persists() && !policy.is_expired_at(self.clock.now_ms()) => {
                    let record = self.read_durable(key, policy).await;
                    match record {
                        Some(record) if policy.mode == CacheMode::Restore => {
                            self.promote(key, &record).await;
                            Some(record.data)
                        }
                        Some(record) => Some(record.data),
                        None => None,
                    }
                }
                None => None,
            },
        };

        self.record_read(scope, value.is_some());
        value
    }

    /// Cache check used by the execution pipeline
    ///
    /// Only `restore` descriptors may be served from the durable tier; a
    /// `placeholder` record never counts as a hit here.
    pub async fn lookup(&self, method: &Method) -> Option<Value> {
        let policy = method.cache_policy();
        let key = method.key();

        if let Some(value) = self.read_volatile(key).await {
            self.stats.increment_volatile_hits();
            debug!(context = %self.context_id, key = %key, "Volatile cache hit");
            return Some(value);
        }

        if policy.mode == CacheMode::Restore {
            if let Some(record) = self.read_durable(key, policy).await {
                self.stats.increment_durable_hits();
                debug!(context = %self.context_id, key = %key, "Restored durable cache record");
                self.promote(key, &record).await;
                return Some(record.data);
            }
        }

        self.stats.increment_misses();
        None
    }

    /// Durable value used to paint a `placeholder` (or `restore`) binding
    pub async fn read_placeholder(&self, method: &Method) -> Option<Value> {
        let policy = method.cache_policy();
        if !policy.persists() {
            return None;
        }
        self.read_durable(method.key(), policy).await.map(|r| r.data)
    }

    async fn promote(&self, key: &str, record: &CachedRecord) {
        let promoted = CachedRecord::new(record.data.clone(), record.expires_at, None);
        self.tier_set(TierKind::Volatile, &self.volatile_key(key), promoted)
            .await;
    }

    fn record_read(&self, scope: ReadScope, hit: bool) {
        match (scope, hit) {
            (_, false) => self.stats.increment_misses(),
            (ReadScope::L2, true) => self.stats.increment_durable_hits(),
            (_, true) => self.stats.increment_volatile_hits(),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write a descriptor's value according to its policy
    ///
    /// Returns false when nothing was written or any tier write failed.
    pub async fn write(&self, method: &Method, data: &Value, scope: ReadScope) -> bool {
        let _gate = self.update_gate.lock().await;
        self.write_unlocked(method.key(), method.cache_policy(), data, scope)
            .await
    }

    async fn write_unlocked(
        &self,
        key: &str,
        policy: &CachePolicy,
        data: &Value,
        scope: ReadScope,
    ) -> bool {
        let now = self.clock.now_ms();
        if policy.is_expired_at(now) {
            return false;
        }
        let expires_at = policy.expires_at(now);
        let persist = policy.persists() && scope != ReadScope::L1;
        // A restore record written to the durable tier is promoted as well
        let volatile = scope != ReadScope::L2 || (persist && policy.mode == CacheMode::Restore);

        let mut ok = true;
        if volatile {
            let record = CachedRecord::new(data.clone(), expires_at, None);
            ok &= self
                .tier_set(TierKind::Volatile, &self.volatile_key(key), record)
                .await;
        }
        if persist {
            let record = CachedRecord::new(data.clone(), expires_at, policy.tag.clone());
            ok &= self
                .tier_set(TierKind::Durable, &self.durable_key(key), record)
                .await;
        }
        ok
    }

    /// Read-modify-write of one descriptor's cached value
    ///
    /// The updater receives the current value (if any); returning `None`
    /// removes the entry. Concurrent updates and writes are serialized.
    pub async fn update_with<F>(&self, method: &Method, updater: F) -> bool
    where
        F: FnOnce(Option<Value>) -> Option<Value> + Send,
    {
        let _gate = self.update_gate.lock().await;
        let current = self.read(method, ReadScope::All).await;
        match updater(current) {
            Some(next) => {
                self.write_unlocked(
                    method.key(),
                    method.cache_policy(),
                    &next,
                    ReadScope::All,
                )
                .await
            }
            None => {
                self.remove_key(method.key()).await;
                true
            }
        }
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Drop the given descriptors' entries, or flush both tiers with `None`
    pub async fn invalidate(&self, methods: Option<&[Method]>) {
        match methods {
            None => {
                debug!(context = %self.context_id, "Flushing both cache tiers");
                self.tier_clear(TierKind::Volatile).await;
                self.tier_clear(TierKind::Durable).await;
            }
            Some(methods) => {
                for method in methods {
                    self.remove_key(method.key()).await;
                }
            }
        }
    }

    /// Drop raw cache keys from both tiers
    pub async fn invalidate_keys(&self, keys: &[String]) {
        for key in keys {
            self.remove_key(key).await;
        }
    }

    async fn remove_key(&self, key: &str) {
        self.tier_remove(TierKind::Volatile, &self.volatile_key(key))
            .await;
        self.tier_remove(TierKind::Durable, &self.durable_key(key))
            .await;
    }

    /// Invalidate registered descriptors linked to `source` by dependency tags
    ///
    /// A registered descriptor is dependent when one of its tags matches the
    /// source's name or key. A source that is never cached (a mutation) also
    /// invalidates the descriptors its own tags match; a cacheable read only
    /// ever acts as a target of tags. `peers` are the coordinators of every context in the process and are
    /// only used with the `Global` scope. Returns the number of descriptors
    /// invalidated.
    pub async fn invalidate_by_dependency(
        &self,
        source: &Method,
        registry: &SnapshotRegistry,
        scope: AutoInvalidateScope,
        peers: &[Arc<CacheCoordinator>],
    ) -> usize {
        if scope == AutoInvalidateScope::Off {
            return 0;
        }

        let source_name = source.name();
        let source_uncached = source.cache_policy().is_expired_at(self.clock.now_ms())
            || source.config().body.is_special();
        let targets: Vec<Method> = registry
            .all()
            .into_iter()
            .filter(|target| target.key() != source.key())
            .filter(|target| {
                let target_name = target.name();
                target
                    .dependency_tags()
                    .iter()
                    .any(|tag| tag.matches(source_name.as_deref(), source.key()))
                    || (source_uncached
                        && source
                            .dependency_tags()
                            .iter()
                            .any(|tag| tag.matches(target_name.as_deref(), target.key())))
            })
            .collect();

        let mut invalidated = 0;
        for target in targets {
            let keys = [target.key().to_string()];
            if scope == AutoInvalidateScope::SelfContext {
                if target.context().id() != self.context_id {
                    continue;
                }
                self.invalidate_keys(&keys).await;
            } else {
                for peer in peers {
                    peer.invalidate_keys(&keys).await;
                }
            }
            debug!(
                source = %source.key(),
                target = %target.key(),
                "Invalidated dependent cache entry"
            );
            invalidated += 1;
        }
        invalidated
    }
}
