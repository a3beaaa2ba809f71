// Engine module
//
// Process-wide root owning what every context shares: the snapshot registry,
// in-flight request sharing, the bound reactive state adapter and the hook
// tracking registry. Contexts are created through the engine so dependency
// invalidation can reach every context's cache.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::cache::{CacheCoordinator, CacheTier, FileTier, MapTier, MemoryTier, ReadScope};
use crate::clock::{Clock, SystemClock};
use crate::config::GlobalConfig;
use crate::constants::{DATA_STATE_NAME, DEFAULT_CONTEXT_ID_PREFIX, RESERVED_STATE_NAMES};
use crate::context::{Context, ContextInner, ContextOptions};
use crate::error::{EngineError, Result};
use crate::hooks::binding::BindingRegistry;
use crate::hooks::StateAdapter;
use crate::sharing::RequestSharing;
use crate::snapshot::{Matcher, SnapshotRegistry};

pub(crate) struct EngineInner {
    config: GlobalConfig,
    clock: Arc<dyn Clock>,
    snapshots: SnapshotRegistry,
    sharing: RequestSharing,
    adapter: RwLock<Option<Arc<dyn StateAdapter>>>,
    contexts: Mutex<Vec<Weak<ContextInner>>>,
    bindings: BindingRegistry,
    next_binding_id: AtomicU64,
    next_context_ordinal: AtomicU64,
}

/// Handle to the engine, cheap to clone
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: GlobalConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Engine reading time from `clock` (cache expiry)
    pub fn with_clock(config: GlobalConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate().map_err(EngineError::Config)?;
        let snapshots = SnapshotRegistry::new(config.snapshot_capacity);
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                clock,
                snapshots,
                sharing: RequestSharing::new(),
                adapter: RwLock::new(None),
                contexts: Mutex::new(Vec::new()),
                bindings: BindingRegistry::default(),
                next_binding_id: AtomicU64::new(1),
                next_context_ordinal: AtomicU64::new(0),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn snapshots(&self) -> &SnapshotRegistry {
        &self.inner.snapshots
    }

    pub fn sharing(&self) -> &RequestSharing {
        &self.inner.sharing
    }

    pub(crate) fn bindings(&self) -> &BindingRegistry {
        &self.inner.bindings
    }

    pub(crate) fn next_binding_id(&self) -> u64 {
        self.inner.next_binding_id.fetch_add(1, Ordering::SeqCst)
    }

    // ========================================================================
    // Contexts
    // ========================================================================

    /// Create a context
    ///
    /// Tiers not supplied in `options` default to a `MemoryTier` (volatile)
    /// and a `FileTier` under `durable_dir` or an in-process `MapTier`
    /// (durable).
    pub fn create_context(&self, mut options: ContextOptions) -> Result<Context> {
        options.config.validate().map_err(EngineError::Config)?;
        if let Some(adapter) = options.state_adapter.take() {
            self.bind_state_adapter(adapter)?;
        }

        // Without an explicit id the creation order names the context, so a
        // restarted process finds its durable entries again
        let ordinal = self.inner.next_context_ordinal.fetch_add(1, Ordering::SeqCst);
        let id = options
            .config
            .id
            .clone()
            .unwrap_or_else(|| format!("{}{}", DEFAULT_CONTEXT_ID_PREFIX, ordinal));

        let volatile: Arc<dyn CacheTier> = match options.volatile.take() {
            Some(tier) => tier,
            None => Arc::new(MemoryTier::new(options.config.volatile_capacity)),
        };
        let durable: Arc<dyn CacheTier> = match (options.durable.take(), &options.config.durable_dir) {
            (Some(tier), _) => tier,
            (None, Some(dir)) => Arc::new(FileTier::new(dir)),
            (None, None) => Arc::new(MapTier::new()),
        };

        let coordinator = Arc::new(CacheCoordinator::new(
            id.clone(),
            volatile,
            durable,
            self.inner.clock.clone(),
        ));

        let base_url = options.config.base_url.clone();
        let context = Context::new(id, options, coordinator, Arc::downgrade(&self.inner));

        let mut contexts = self.inner.contexts.lock();
        contexts.retain(|weak| weak.strong_count() > 0);
        contexts.push(context.downgrade());

        info!(context = %context.id(), base_url = %base_url, "Context created");
        Ok(context)
    }

    /// Live contexts in creation order
    pub fn contexts(&self) -> Vec<Context> {
        self.inner
            .contexts
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(Context::from_inner)
            .collect()
    }

    /// Cache coordinators of every live context
    pub fn coordinators(&self) -> Vec<Arc<CacheCoordinator>> {
        self.contexts()
            .iter()
            .map(|context| context.coordinator().clone())
            .collect()
    }

    // ========================================================================
    // State adapter
    // ========================================================================

    /// Bind the reactive state adapter
    ///
    /// Re-binding an adapter of the same kind keeps the first one; a different
    /// kind is a configuration error.
    pub fn bind_state_adapter(&self, adapter: Arc<dyn StateAdapter>) -> Result<()> {
        let mut bound = self.inner.adapter.write();
        match bound.as_ref() {
            Some(existing) if existing.kind() != adapter.kind() => Err(EngineError::Config(format!(
                "state adapter '{}' already bound, cannot bind '{}'",
                existing.kind(),
                adapter.kind()
            ))),
            Some(_) => Ok(()),
            None => {
                debug!(kind = adapter.kind(), "State adapter bound");
                *bound = Some(adapter);
                Ok(())
            }
        }
    }

    pub fn state_adapter(&self) -> Result<Arc<dyn StateAdapter>> {
        self.inner
            .adapter
            .read()
            .clone()
            .ok_or_else(|| EngineError::Assertion("no state adapter bound".to_string()))
    }

    // ========================================================================
    // Cache API
    // ========================================================================

    /// Cached value of the first descriptor `matcher` resolves to
    pub async fn query_cache(&self, matcher: &Matcher, scope: ReadScope) -> Option<Value> {
        let method = self.inner.snapshots.match_one(matcher)?;
        method.context().coordinator().read(&method, scope).await
    }

    /// Read-modify-write the cached value of every matched descriptor
    ///
    /// The updater receives the current value; returning `None` removes the
    /// entry.
    pub async fn set_cache<F>(&self, matcher: &Matcher, updater: F) -> Result<()>
    where
        F: Fn(Option<Value>) -> Option<Value> + Send + Sync,
    {
        let methods = self.inner.snapshots.matches(matcher, true);
        if methods.is_empty() {
            return Err(EngineError::Assertion(format!(
                "no descriptor matches {:?}",
                matcher
            )));
        }
        for method in &methods {
            method
                .context()
                .coordinator()
                .update_with(method, |current| updater(current))
                .await;
        }
        Ok(())
    }

    /// Drop cached entries of matched descriptors, or every cache with `None`
    pub async fn invalidate_cache(&self, matcher: Option<&Matcher>) {
        match matcher {
            None => {
                for coordinator in self.coordinators() {
                    coordinator.invalidate(None).await;
                }
            }
            Some(matcher) => {
                for method in self.inner.snapshots.matches(matcher, true) {
                    method
                        .context()
                        .coordinator()
                        .invalidate(Some(std::slice::from_ref(&method)))
                        .await;
                }
            }
        }
    }

    // ========================================================================
    // Hook state
    // ========================================================================

    /// Update a state of every hook tracking the descriptor `matcher` resolves to
    ///
    /// `name` is `data` or an extra state declared on the hook.
    pub fn update_state<F>(&self, matcher: &Matcher, name: &str, updater: F) -> Result<()>
    where
        F: Fn(Value) -> Value,
    {
        if RESERVED_STATE_NAMES.contains(&name) {
            return Err(EngineError::Assertion(format!(
                "state '{}' is managed by the hook and cannot be updated",
                name
            )));
        }

        let method = self.inner.snapshots.match_one(matcher).ok_or_else(|| {
            EngineError::Assertion(format!("no descriptor matches {:?}", matcher))
        })?;

        let bindings = self.inner.bindings.tracking_method(&method);
        if bindings.is_empty() {
            return Err(EngineError::Assertion(format!(
                "no hook is tracking {} {}",
                method.verb(),
                method.url()
            )));
        }

        // All or nothing: every tracking hook must own the state
        if let Some(binding) = bindings.iter().find(|binding| binding.state(name).is_none()) {
            return Err(EngineError::Assertion(format!(
                "hook {} has no state '{}'",
                binding.id, name
            )));
        }

        for binding in &bindings {
            if let Some(state) = binding.state(name) {
                let next = updater(state.get());
                binding.set_states(vec![(name, next)]);
            }
        }
        debug!(state = name, key = %method.key(), "Updated hook state");
        Ok(())
    }

    /// Shorthand for updating the `data` state
    pub fn update_data<F>(&self, matcher: &Matcher, updater: F) -> Result<()>
    where
        F: Fn(Value) -> Value,
    {
        self.update_state(matcher, DATA_STATE_NAME, updater)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("snapshots", &self.inner.snapshots.len())
            .finish()
    }
}
