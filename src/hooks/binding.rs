// Hook binding and invocation driver
//
// A binding ties a descriptor source to a set of reactive states created by
// the engine's state adapter. Every invocation goes through `run`:
// - resolve the descriptor (a factory error propagates to the caller)
// - sendable gate (false skips the send, loading never flips)
// - supersede the previous invocation (watchers with abort_last)
// - track the cache key so fetchers and `update_state` can find this binding
// - seed `placeholder` data from the durable tier
// - run the middleware around `Next`
//
// Results are applied only while the invocation is authoritative: the binding
// is still mounted and, for abort_last watchers, no newer invocation exists.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::debug;

use super::events::{EventKind, HookEvent, Listeners};
use super::middleware::{Invocation, MiddlewareContext, Next};
use super::state::{BindingContext, BindingStates, StateAdapter, StateHandle};
use super::{HookKind, HookOptions, MethodSource};
use crate::cache::{CacheMode, ReadScope};
use crate::constants::{
    DATA_STATE_NAME, DOWNLOADING_STATE_NAME, ERROR_STATE_NAME, LOADING_STATE_NAME,
    TIER_KEY_SEPARATOR, UPLOADING_STATE_NAME,
};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::method::{Method, Progress, Subscription};
use crate::pipeline::SendOutcome;
use crate::transport::AbortController;

fn progress_value(progress: Progress) -> Value {
    json!({ "loaded": progress.loaded, "total": progress.total })
}

fn tracking_key(method: &Method) -> String {
    format!(
        "{}{}{}",
        method.context().id(),
        TIER_KEY_SEPARATOR,
        method.key()
    )
}

pub(crate) struct BindingInner {
    pub id: u64,
    pub kind: HookKind,
    pub ctx: BindingContext,
    pub options: HookOptions,
    pub listeners: Listeners,
    pub adapter: Arc<dyn StateAdapter>,
    engine: Engine,
    states: BindingStates,
    source: Option<MethodSource>,
    seq: AtomicU64,
    current: Mutex<Option<Method>>,
    current_abort: Mutex<Option<AbortController>>,
    tracked_key: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    unmounted: AtomicBool,
}

impl BindingInner {
    pub fn new(
        engine: Engine,
        adapter: Arc<dyn StateAdapter>,
        id: u64,
        kind: HookKind,
        source: Option<MethodSource>,
        options: HookOptions,
    ) -> Self {
        let ctx = BindingContext {
            binding_id: id,
            kind,
        };

        let mut initial = vec![
            (LOADING_STATE_NAME.to_string(), Value::Bool(false)),
            (ERROR_STATE_NAME.to_string(), Value::Null),
            (
                DOWNLOADING_STATE_NAME.to_string(),
                progress_value(Progress::default()),
            ),
            (
                UPLOADING_STATE_NAME.to_string(),
                progress_value(Progress::default()),
            ),
        ];
        if kind != HookKind::Fetcher {
            initial.push((DATA_STATE_NAME.to_string(), options.initial_data.clone()));
        }
        initial.extend(options.extra_states.iter().cloned());

        let states: HashMap<String, StateHandle> = initial
            .into_iter()
            .map(|(name, value)| {
                let state = adapter.create(value, &ctx);
                (name, state)
            })
            .collect();

        Self {
            id,
            kind,
            ctx,
            options,
            listeners: Listeners::default(),
            adapter,
            engine,
            states,
            source,
            seq: AtomicU64::new(0),
            current: Mutex::new(None),
            current_abort: Mutex::new(None),
            tracked_key: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            unmounted: AtomicBool::new(false),
        }
    }

    pub fn state(&self, name: &str) -> Option<&StateHandle> {
        self.states.get(name)
    }

    pub fn set_states(&self, changes: Vec<(&str, Value)>) {
        let changes = changes
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        self.adapter.update(changes, &self.states, &self.ctx);
    }

    pub fn current_method(&self) -> Option<Method> {
        self.current.lock().clone()
    }

    pub fn is_unmounted(&self) -> bool {
        self.unmounted.load(Ordering::SeqCst)
    }

    fn resolve(&self, args: &[Value]) -> Result<Method> {
        match &self.source {
            Some(MethodSource::Method(method)) => Ok(method.clone()),
            Some(MethodSource::Factory(factory)) => factory(args),
            None => Err(EngineError::Assertion(
                "fetcher has no descriptor source, use fetch()".to_string(),
            )),
        }
    }

    fn is_authoritative(&self, seq: u64) -> bool {
        if self.is_unmounted() {
            return false;
        }
        !(self.kind == HookKind::Watcher
            && self.options.abort_last
            && seq != self.seq.load(Ordering::SeqCst))
    }

    /// Drive one invocation
    ///
    /// `Ok(None)` means nothing was sent (sendable gate or unmounted binding).
    pub async fn run(self: &Arc<Self>, args: Vec<Value>, explicit: Option<Method>) -> Result<Option<Value>> {
        if self.is_unmounted() {
            return Ok(None);
        }

        let method = match explicit {
            Some(method) => method,
            None => self.resolve(&args)?,
        };

        if let Some(sendable) = &self.options.sendable {
            if !sendable(&args)? {
                debug!(binding = self.id, key = %method.key(), "Send rejected by sendable gate");
                return Ok(None);
            }
        }

        // The abort pair exists before the first await so a newer invocation
        // can cancel this one while it is still reading the cache
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (controller, registration) = AbortController::new();
        *self.current.lock() = Some(method.clone());
        let previous = self.current_abort.lock().replace(controller.clone());
        if self.kind == HookKind::Watcher && self.options.abort_last {
            if let Some(previous) = previous {
                previous.abort();
            }
        }

        if self.kind != HookKind::Fetcher {
            self.engine.bindings().track(&tracking_key(&method), self);
        }

        let force = self.options.force;
        let coordinator = method.context().coordinator().clone();
        let mode = method.cache_policy().mode;
        let cached = if force || method.cache_supplier().is_some() {
            None
        } else if mode == CacheMode::Restore {
            coordinator.read(&method, ReadScope::All).await
        } else {
            coordinator.read(&method, ReadScope::L1).await
        };

        if self.kind != HookKind::Fetcher && cached.is_none() && mode == CacheMode::Placeholder {
            if let Some(placeholder) = coordinator.read_placeholder(&method).await {
                debug!(binding = self.id, key = %method.key(), "Seeding placeholder data");
                self.set_states(vec![(DATA_STATE_NAME, placeholder)]);
            }
        }

        let invocation = Arc::new(Invocation::default());
        let next = Next {
            binding: self.clone(),
            method: method.clone(),
            args: args.clone(),
            seq,
            force,
            has_cache: cached.is_some(),
            invocation: invocation.clone(),
            abort: controller.clone(),
            registration: Mutex::new(Some(registration)),
        };

        let result = match &self.options.middleware {
            Some(middleware) => {
                let ctx = MiddlewareContext {
                    binding: self.clone(),
                    method: method.clone(),
                    cached,
                    args: args.clone(),
                    invocation: invocation.clone(),
                    abort: controller,
                };
                middleware.handle(ctx, next).await
            }
            None => next.run().await,
        };

        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                // Errors raised by the middleware itself, outside `next`
                if !invocation.settled() {
                    self.settle(&method, &args, seq, &Err(err.clone()), &invocation);
                }
                Err(err)
            }
        }
    }

    /// Apply a settled invocation to the states and listeners
    pub fn settle(
        &self,
        method: &Method,
        args: &[Value],
        seq: u64,
        outcome: &Result<SendOutcome>,
        invocation: &Invocation,
    ) {
        invocation.mark_settled();
        if !self.is_authoritative(seq) {
            debug!(binding = self.id, seq, "Discarding superseded result");
            return;
        }

        let loading_controlled = invocation.loading_controlled();
        let mut changes = Vec::new();
        let event_kind = match outcome {
            Ok(outcome) => {
                if self.kind == HookKind::Fetcher {
                    for binding in self.engine.bindings().tracking(&tracking_key(method)) {
                        if binding.kind != HookKind::Fetcher {
                            binding.set_states(vec![(DATA_STATE_NAME, outcome.data.clone())]);
                        }
                    }
                } else {
                    changes.push((DATA_STATE_NAME, outcome.data.clone()));
                }
                changes.push((ERROR_STATE_NAME, Value::Null));
                EventKind::Success
            }
            Err(err) => {
                // Previous data stays in place
                changes.push((ERROR_STATE_NAME, Value::String(err.to_string())));
                method.context().error_logger().log(err, method);
                EventKind::Error
            }
        };
        if !loading_controlled {
            changes.push((LOADING_STATE_NAME, Value::Bool(false)));
        }
        self.set_states(changes);

        let event = HookEvent {
            method: method.clone(),
            args: args.to_vec(),
            from_cache: outcome.as_ref().map(|o| o.from_cache).unwrap_or(false),
            outcome: outcome.as_ref().map(|o| o.data.clone()).map_err(Clone::clone),
        };
        self.listeners.emit(event_kind, &event);
        self.listeners.emit(EventKind::Complete, &event);
    }

    pub fn subscribe_progress(self: &Arc<Self>, method: &Method) -> Vec<Subscription> {
        let download = Arc::downgrade(self);
        let upload = Arc::downgrade(self);
        vec![
            method.on_download(move |progress| {
                if let Some(binding) = download.upgrade() {
                    binding.set_states(vec![(DOWNLOADING_STATE_NAME, progress_value(progress))]);
                }
            }),
            method.on_upload(move |progress| {
                if let Some(binding) = upload.upgrade() {
                    binding.set_states(vec![(UPLOADING_STATE_NAME, progress_value(progress))]);
                }
            }),
        ]
    }

    /// Spawn one invocation with no arguments
    pub fn spawn_invocation(self: &Arc<Self>) {
        let binding = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let Some(binding) = binding.upgrade() else {
                return;
            };
            if let Err(err) = binding.run(Vec::new(), None).await {
                debug!(binding = binding.id, error = %err, "Background invocation failed");
            }
        });
        self.add_task(handle);
    }

    pub fn add_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    pub fn abort(&self) {
        if let Some(controller) = self.current_abort.lock().as_ref() {
            controller.abort();
        }
        if let Some(method) = self.current.lock().as_ref() {
            method.abort();
        }
    }

    pub fn unmount(&self) {
        if self.unmounted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.bindings().untrack(self);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.abort();
    }
}

impl Drop for BindingInner {
    fn drop(&mut self) {
        self.engine.bindings().untrack(self);
    }
}

/// Bindings tracking each cache key (context id + key)
#[derive(Default)]
pub(crate) struct BindingRegistry {
    by_key: Mutex<HashMap<String, Vec<Weak<BindingInner>>>>,
}

impl BindingRegistry {
    /// Track `binding` under `key`, moving it off the key it tracked before
    pub fn track(&self, key: &str, binding: &Arc<BindingInner>) {
        let mut tracked = binding.tracked_key.lock();
        if tracked.as_deref() == Some(key) {
            return;
        }

        let mut by_key = self.by_key.lock();
        if let Some(old_key) = tracked.take() {
            Self::remove_from(&mut by_key, &old_key, Arc::as_ptr(binding));
        }
        let entry = by_key.entry(key.to_string()).or_default();
        entry.retain(|weak| weak.strong_count() > 0);
        entry.push(Arc::downgrade(binding));
        *tracked = Some(key.to_string());
    }

    pub fn untrack(&self, binding: &BindingInner) {
        if let Some(key) = binding.tracked_key.lock().take() {
            Self::remove_from(&mut self.by_key.lock(), &key, binding as *const BindingInner);
        }
    }

    /// Live, mounted bindings tracking `key`
    ///
    /// Dead entries under `key` are pruned on the way.
    pub fn tracking(&self, key: &str) -> Vec<Arc<BindingInner>> {
        let live: Vec<Arc<BindingInner>> = {
            let mut by_key = self.by_key.lock();
            let Some(list) = by_key.get_mut(key) else {
                return Vec::new();
            };
            list.retain(|weak| weak.strong_count() > 0);
            let live = list.iter().filter_map(Weak::upgrade).collect();
            if list.is_empty() {
                by_key.remove(key);
            }
            live
        };
        // Upgraded handles are released outside the lock
        live.into_iter()
            .filter(|binding| !binding.is_unmounted())
            .collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.by_key.lock().len()
    }

    /// Live bindings tracking `method`
    pub fn tracking_method(&self, method: &Method) -> Vec<Arc<BindingInner>> {
        self.tracking(&tracking_key(method))
    }

    fn remove_from(
        by_key: &mut HashMap<String, Vec<Weak<BindingInner>>>,
        key: &str,
        binding: *const BindingInner,
    ) {
        if let Some(list) = by_key.get_mut(key) {
            list.retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), binding));
            if list.is_empty() {
                by_key.remove(key);
            }
        }
    }
}
