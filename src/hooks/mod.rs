// Reactive binding module
//
// Three hook kinds share one driver (see `binding`):
// - request: one descriptor (or factory), sent on bind unless disabled
// - watcher: re-sent whenever a watched value changes, with optional debounce
// - fetcher: sends into the cache and updates other bindings tracking the key,
//   without owning a data state
//
// States live in the engine's `StateAdapter`; `Hook` exposes them through
// `StateAdapter::export`.

pub(crate) mod binding;
pub mod events;
pub mod middleware;
pub mod state;
pub mod watch;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{DATA_STATE_NAME, DEFAULT_ABORT_LAST, RESERVED_STATE_NAMES};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::method::Method;

pub use events::{EventHandler, HookEvent};
pub use middleware::{Middleware, MiddlewareContext, Next, NextOverrides};
pub use state::{
    BindingContext, BindingStates, ExportedState, StateAdapter, StateCell, StateHandle,
    WatchAdapter,
};
pub use watch::WatchSource;

use binding::BindingInner;
use events::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Request,
    Watcher,
    Fetcher,
}

pub type MethodFactory = Arc<dyn Fn(&[Value]) -> Result<Method> + Send + Sync>;

pub type SendablePredicate = Arc<dyn Fn(&[Value]) -> Result<bool> + Send + Sync>;

/// Descriptor a request/watcher hook sends
#[derive(Clone)]
pub enum MethodSource {
    Method(Method),
    /// Built from the send arguments on every invocation
    Factory(MethodFactory),
}

impl MethodSource {
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Method> + Send + Sync + 'static,
    {
        MethodSource::Factory(Arc::new(factory))
    }
}

impl From<Method> for MethodSource {
    fn from(method: Method) -> Self {
        MethodSource::Method(method)
    }
}

impl From<&Method> for MethodSource {
    fn from(method: &Method) -> Self {
        MethodSource::Method(method.clone())
    }
}

/// Options shared by all hook kinds
#[derive(Clone)]
pub struct HookOptions {
    pub(crate) immediate: Option<bool>,
    pub(crate) initial_data: Value,
    pub(crate) force: bool,
    pub(crate) middleware: Option<Arc<dyn Middleware>>,
    pub(crate) sendable: Option<SendablePredicate>,
    pub(crate) abort_last: bool,
    pub(crate) debounce: Vec<Duration>,
    pub(crate) extra_states: Vec<(String, Value)>,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self {
            immediate: None,
            initial_data: Value::Null,
            force: false,
            middleware: None,
            sendable: None,
            abort_last: DEFAULT_ABORT_LAST,
            debounce: Vec::new(),
            extra_states: Vec::new(),
        }
    }
}

impl HookOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send on bind (request hooks default to true, watchers to false)
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(immediate);
        self
    }

    pub fn initial_data(mut self, data: Value) -> Self {
        self.initial_data = data;
        self
    }

    /// Skip the cache on every send
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware = Some(Arc::new(middleware));
        self
    }

    /// Gate evaluated with the send arguments; false skips the send
    pub fn sendable<F>(mut self, sendable: F) -> Self
    where
        F: Fn(&[Value]) -> Result<bool> + Send + Sync + 'static,
    {
        self.sendable = Some(Arc::new(sendable));
        self
    }

    /// Only the latest watcher invocation may update state (default: true)
    pub fn abort_last(mut self, abort_last: bool) -> Self {
        self.abort_last = abort_last;
        self
    }

    /// One debounce delay for every watched value
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.debounce = vec![delay];
        self
    }

    /// Debounce delay per watched value, by position
    pub fn debounce_each(mut self, delays: Vec<Duration>) -> Self {
        self.debounce = delays;
        self
    }

    /// Extra user state, updatable through `Engine::update_state`
    pub fn state(mut self, name: impl Into<String>, initial: Value) -> Self {
        self.extra_states.push((name.into(), initial));
        self
    }

    fn debounce_for(&self, index: usize) -> Duration {
        match self.debounce.as_slice() {
            [] => Duration::ZERO,
            [single] => *single,
            delays => delays.get(index).copied().unwrap_or(Duration::ZERO),
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, _) in &self.extra_states {
            if name == DATA_STATE_NAME || RESERVED_STATE_NAMES.contains(&name.as_str()) {
                return Err(EngineError::Assertion(format!(
                    "state name '{}' is owned by the hook",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Handle of a mounted hook
#[derive(Clone)]
pub struct Hook {
    inner: Arc<BindingInner>,
}

impl Hook {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> HookKind {
        self.inner.kind
    }

    /// Exported state by name
    pub fn state(&self, name: &str) -> Option<ExportedState> {
        self.inner
            .state(name)
            .map(|state| self.inner.adapter.export(state, &self.inner.ctx))
    }

    /// Current value of a state
    pub fn value(&self, name: &str) -> Option<Value> {
        self.inner.state(name).map(|state| state.get())
    }

    pub fn loading(&self) -> bool {
        self.value(crate::constants::LOADING_STATE_NAME) == Some(Value::Bool(true))
    }

    /// Current data (`None` for fetchers)
    pub fn data(&self) -> Option<Value> {
        self.value(DATA_STATE_NAME)
    }

    /// Message of the last error, if the last settled invocation failed
    pub fn error(&self) -> Option<String> {
        match self.value(crate::constants::ERROR_STATE_NAME) {
            Some(Value::String(message)) => Some(message),
            _ => None,
        }
    }

    /// Descriptor of the latest invocation
    pub fn current_method(&self) -> Option<Method> {
        self.inner.current_method()
    }

    /// Send with arguments passed to the factory, gate and middleware
    ///
    /// `Ok(None)` means nothing was sent.
    pub async fn send(&self, args: Vec<Value>) -> Result<Option<Value>> {
        self.inner.run(args, None).await
    }

    /// Send `method` through this hook (the fetcher entry point)
    pub async fn fetch(&self, method: &Method, args: Vec<Value>) -> Result<Option<Value>> {
        self.inner.run(args, Some(method.clone())).await
    }

    /// Abort the latest invocation's request
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Set states directly
    pub fn update(&self, changes: Vec<(&str, Value)>) -> Result<()> {
        for (name, _) in &changes {
            if self.inner.state(name).is_none() {
                return Err(EngineError::Assertion(format!("unknown state '{}'", name)));
            }
        }
        self.inner.set_states(changes);
        Ok(())
    }

    pub fn on_success<F>(&self, handler: F) -> &Self
    where
        F: Fn(&HookEvent) + Send + Sync + 'static,
    {
        self.listen(EventKind::Success, Arc::new(handler))
    }

    pub fn on_error<F>(&self, handler: F) -> &Self
    where
        F: Fn(&HookEvent) + Send + Sync + 'static,
    {
        self.listen(EventKind::Error, Arc::new(handler))
    }

    pub fn on_complete<F>(&self, handler: F) -> &Self
    where
        F: Fn(&HookEvent) + Send + Sync + 'static,
    {
        self.listen(EventKind::Complete, Arc::new(handler))
    }

    fn listen(&self, kind: EventKind, handler: EventHandler) -> &Self {
        let handler = self.inner.adapter.memoize(handler);
        self.inner.listeners.add(kind, handler);
        self
    }

    /// Stop tracking, cancel watch tasks and abort the in-flight request
    pub fn unmount(&self) {
        self.inner.unmount();
    }

    pub fn is_unmounted(&self) -> bool {
        self.inner.is_unmounted()
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

impl Engine {
    fn create_binding(
        &self,
        kind: HookKind,
        source: Option<MethodSource>,
        options: HookOptions,
    ) -> Result<Arc<BindingInner>> {
        let adapter = self.state_adapter()?;
        options.validate()?;
        Ok(Arc::new(BindingInner::new(
            self.clone(),
            adapter,
            self.next_binding_id(),
            kind,
            source,
            options,
        )))
    }

    /// Bind a descriptor (or factory) to reactive state
    pub fn use_request(&self, source: impl Into<MethodSource>, options: HookOptions) -> Result<Hook> {
        let binding = self.create_binding(HookKind::Request, Some(source.into()), options)?;

        if binding.options.immediate.unwrap_or(true) {
            let weak = Arc::downgrade(&binding);
            binding.adapter.effect(
                Box::new(move || {
                    if let Some(binding) = weak.upgrade() {
                        binding.spawn_invocation();
                    }
                }),
                &binding.ctx,
            );
        }

        Ok(Hook { inner: binding })
    }

    /// Bind a descriptor (or factory) that is re-sent when a watched value changes
    ///
    /// The first immediate send is never debounced.
    pub fn use_watcher(
        &self,
        source: impl Into<MethodSource>,
        watching: Vec<Box<dyn WatchSource>>,
        options: HookOptions,
    ) -> Result<Hook> {
        if watching.is_empty() {
            return Err(EngineError::Assertion(
                "watcher needs at least one watched value".to_string(),
            ));
        }
        let binding = self.create_binding(HookKind::Watcher, Some(source.into()), options)?;
        let immediate = binding.options.immediate.unwrap_or(false);

        let weak = Arc::downgrade(&binding);
        binding.adapter.effect(
            Box::new(move || {
                let Some(binding) = weak.upgrade() else {
                    return;
                };
                for (index, source) in watching.into_iter().enumerate() {
                    let delay = binding.options.debounce_for(index);
                    let handle = tokio::spawn(watch::watch_source(weak.clone(), source, delay));
                    binding.add_task(handle);
                }
                if immediate {
                    binding.spawn_invocation();
                }
            }),
            &binding.ctx,
        );

        Ok(Hook { inner: binding })
    }

    /// Hook that fetches descriptors into the cache
    ///
    /// Success updates the data state of every request/watcher hook tracking
    /// the fetched key.
    pub fn use_fetcher(&self, options: HookOptions) -> Result<Hook> {
        let binding = self.create_binding(HookKind::Fetcher, None, options)?;
        Ok(Hook { inner: binding })
    }
}
