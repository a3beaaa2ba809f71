// Context module
//
// A context is the composition root for a group of descriptors: it owns the
// cache tiers (through its coordinator), the transport, the request hooks and
// the defaults every descriptor built from it starts with.

use std::fmt;
use std::sync::{Arc, Weak};
use tracing::error;

use crate::cache::{CacheCoordinator, CacheTier};
use crate::config::ContextConfig;
use crate::engine::{Engine, EngineInner};
use crate::error::{EngineError, Result};
use crate::hooks::StateAdapter;
use crate::method::{Method, MethodBuilder, RequestBody, Verb};
use crate::pipeline::{DefaultResponded, RequestInterceptor, RespondedHandler};
use crate::transport::Transport;

pub type ErrorLogFn = Arc<dyn Fn(&EngineError, &Method) + Send + Sync>;

/// Where hook errors are reported
#[derive(Clone, Default)]
pub enum ErrorLogger {
    /// `tracing::error!`
    #[default]
    Default,
    Disabled,
    Custom(ErrorLogFn),
}

impl ErrorLogger {
    pub fn custom<F>(log: F) -> Self
    where
        F: Fn(&EngineError, &Method) + Send + Sync + 'static,
    {
        ErrorLogger::Custom(Arc::new(log))
    }

    pub fn log(&self, err: &EngineError, method: &Method) {
        match self {
            ErrorLogger::Default => {
                error!(verb = %method.verb(), url = %method.url(), error = %err, "Request failed");
            }
            ErrorLogger::Disabled => {}
            ErrorLogger::Custom(log) => log(err, method),
        }
    }
}

impl fmt::Debug for ErrorLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLogger::Default => f.write_str("Default"),
            ErrorLogger::Disabled => f.write_str("Disabled"),
            ErrorLogger::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Everything needed to create a context
pub struct ContextOptions {
    pub(crate) config: ContextConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) volatile: Option<Arc<dyn CacheTier>>,
    pub(crate) durable: Option<Arc<dyn CacheTier>>,
    pub(crate) interceptor: Option<Arc<dyn RequestInterceptor>>,
    pub(crate) responded: Option<Arc<dyn RespondedHandler>>,
    pub(crate) error_logger: ErrorLogger,
    pub(crate) state_adapter: Option<Arc<dyn StateAdapter>>,
}

impl ContextOptions {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            config: ContextConfig::default(),
            transport,
            volatile: None,
            durable: None,
            interceptor: None,
            responded: None,
            error_logger: ErrorLogger::default(),
            state_adapter: None,
        }
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    pub fn volatile_tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.volatile = Some(tier);
        self
    }

    pub fn durable_tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.durable = Some(tier);
        self
    }

    pub fn before_request(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn responded(mut self, responded: Arc<dyn RespondedHandler>) -> Self {
        self.responded = Some(responded);
        self
    }

    pub fn error_logger(mut self, logger: ErrorLogger) -> Self {
        self.error_logger = logger;
        self
    }

    pub fn state_adapter(mut self, adapter: Arc<dyn StateAdapter>) -> Self {
        self.state_adapter = Some(adapter);
        self
    }
}

pub(crate) struct ContextInner {
    id: String,
    config: ContextConfig,
    coordinator: Arc<CacheCoordinator>,
    transport: Arc<dyn Transport>,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
    responded: Arc<dyn RespondedHandler>,
    error_logger: ErrorLogger,
    engine: Weak<EngineInner>,
}

/// Handle to a context, cheap to clone
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub(crate) fn new(
        id: String,
        options: ContextOptions,
        coordinator: Arc<CacheCoordinator>,
        engine: Weak<EngineInner>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                config: options.config,
                coordinator,
                transport: options.transport,
                interceptor: options.interceptor,
                responded: options
                    .responded
                    .unwrap_or_else(|| Arc::new(DefaultResponded)),
                error_logger: options.error_logger,
                engine,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.inner.coordinator
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn interceptor(&self) -> Option<&Arc<dyn RequestInterceptor>> {
        self.inner.interceptor.as_ref()
    }

    pub fn responded(&self) -> &Arc<dyn RespondedHandler> {
        &self.inner.responded
    }

    pub fn error_logger(&self) -> &ErrorLogger {
        &self.inner.error_logger
    }

    /// Engine that created this context
    pub fn engine(&self) -> Result<Engine> {
        self.inner
            .engine
            .upgrade()
            .map(Engine::from_inner)
            .ok_or_else(|| EngineError::Assertion("engine of this context was dropped".to_string()))
    }

    pub fn request(&self, verb: Verb, url: impl Into<String>) -> MethodBuilder {
        MethodBuilder::new(self.clone(), verb, url)
    }

    pub fn get(&self, url: impl Into<String>) -> MethodBuilder {
        self.request(Verb::Get, url)
    }

    pub fn head(&self, url: impl Into<String>) -> MethodBuilder {
        self.request(Verb::Head, url)
    }

    pub fn options(&self, url: impl Into<String>) -> MethodBuilder {
        self.request(Verb::Options, url)
    }

    pub fn delete(&self, url: impl Into<String>) -> MethodBuilder {
        self.request(Verb::Delete, url)
    }

    pub fn post(&self, url: impl Into<String>, body: impl Into<RequestBody>) -> MethodBuilder {
        self.request(Verb::Post, url).body(body)
    }

    pub fn put(&self, url: impl Into<String>, body: impl Into<RequestBody>) -> MethodBuilder {
        self.request(Verb::Put, url).body(body)
    }

    pub fn patch(&self, url: impl Into<String>, body: impl Into<RequestBody>) -> MethodBuilder {
        self.request(Verb::Patch, url).body(body)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("base_url", &self.inner.config.base_url)
            .finish()
    }
}
