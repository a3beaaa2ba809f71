// Request descriptor module
//
// A `Method` describes one logical request: the frozen request shape, its
// cache key and cache policy, dependency tags and per-call hooks. Methods are
// cheap to clone (shared inner state) and are built through `MethodBuilder`,
// which merges the owning context's defaults with explicit options.

pub mod progress;
pub mod request;
pub mod tag;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

use crate::cache::{CacheOptions, CachePolicy};
use crate::context::Context;
use crate::error::Result;
use crate::pipeline::{self, SendOutcome};
use crate::transport::AbortController;

pub use progress::{Direction, Progress, ProgressHandler, Subscription};
pub use request::{RequestBody, RequestConfig, Verb};
pub use tag::DependencyTag;

use progress::ProgressHandlers;

/// Async supplier consulted instead of the cache tiers
pub type CacheSupplier = Arc<dyn Fn() -> BoxFuture<'static, Option<Value>> + Send + Sync>;

/// Per-descriptor transform of the responded data. Receives the response headers.
pub type Transform = Arc<dyn Fn(Value, &[(String, String)]) -> Result<Value> + Send + Sync>;

/// Request descriptor
#[derive(Clone)]
pub struct Method {
    inner: Arc<MethodInner>,
}

struct MethodInner {
    context: Context,
    config: RequestConfig,
    key: String,
    policy: CachePolicy,
    cache_from: Option<CacheSupplier>,
    hit_source: Vec<DependencyTag>,
    transform: Option<Transform>,
    share_request: bool,
    name: RwLock<Option<String>>,
    from_cache: Mutex<Option<bool>>,
    abort: Mutex<Option<AbortController>>,
    progress: Arc<ProgressHandlers>,
}

impl Method {
    /// Stable cache key, computed once at construction
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn config(&self) -> &RequestConfig {
        &self.inner.config
    }

    pub fn verb(&self) -> Verb {
        self.inner.config.verb
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn cache_policy(&self) -> &CachePolicy {
        &self.inner.policy
    }

    pub fn cache_supplier(&self) -> Option<&CacheSupplier> {
        self.inner.cache_from.as_ref()
    }

    pub fn dependency_tags(&self) -> &[DependencyTag] {
        &self.inner.hit_source
    }

    pub fn transform(&self) -> Option<&Transform> {
        self.inner.transform.as_ref()
    }

    pub fn share_request(&self) -> bool {
        self.inner.share_request
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name.read().clone()
    }

    /// Replace the declared name used by matchers and dependency tags
    pub fn rename(&self, name: impl Into<String>) {
        *self.inner.name.write() = Some(name.into());
    }

    /// Whether the latest send was served from cache (`None` before any send)
    pub fn from_cache(&self) -> Option<bool> {
        *self.inner.from_cache.lock()
    }

    pub(crate) fn set_from_cache(&self, from_cache: bool) {
        *self.inner.from_cache.lock() = Some(from_cache);
    }

    pub(crate) fn set_abort(&self, controller: AbortController) {
        *self.inner.abort.lock() = Some(controller);
    }

    /// Abort the latest send of this descriptor
    ///
    /// Works before dispatch has started: the pending dispatch settles with
    /// `EngineError::Aborted` as soon as it is reached.
    pub fn abort(&self) {
        if let Some(controller) = self.inner.abort.lock().as_ref() {
            controller.abort();
        }
    }

    pub fn on_download<F>(&self, handler: F) -> Subscription
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.inner.progress.add(Direction::Download, Arc::new(handler))
    }

    pub fn on_upload<F>(&self, handler: F) -> Subscription
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.inner.progress.add(Direction::Upload, Arc::new(handler))
    }

    pub(crate) fn progress_handlers(&self) -> Arc<ProgressHandlers> {
        self.inner.progress.clone()
    }

    /// True when both handles point at the same descriptor instance
    pub fn ptr_eq(&self, other: &Method) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run the execution pipeline and return the data
    pub async fn send(&self, force: bool) -> Result<Value> {
        self.execute(force).await.map(|outcome| outcome.data)
    }

    /// Run the execution pipeline and return data plus the cache flag
    pub async fn execute(&self, force: bool) -> Result<SendOutcome> {
        pipeline::execute(self, force).await
    }
}

impl IntoFuture for Method {
    type Output = Result<Value>;
    type IntoFuture = BoxFuture<'static, Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.send(false).await })
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("verb", &self.inner.config.verb)
            .field("url", &self.inner.config.url)
            .field("name", &self.name())
            .field("key", &self.inner.key)
            .finish()
    }
}

/// Builder returned by the context's verb factories
pub struct MethodBuilder {
    context: Context,
    config: RequestConfig,
    name: Option<String>,
    cache: Option<CachePolicy>,
    cache_from: Option<CacheSupplier>,
    hit_source: Vec<DependencyTag>,
    transform: Option<Transform>,
    share_request: Option<bool>,
}

impl MethodBuilder {
    pub(crate) fn new(context: Context, verb: Verb, url: impl Into<String>) -> Self {
        Self {
            context,
            config: RequestConfig::new(verb, url),
            name: None,
            cache: None,
            cache_from: None,
            hit_source: Vec::new(),
            transform: None,
            share_request: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.config.set_param(name, Some(value.to_string()));
        self
    }

    /// Param that may be absent; `None` is dropped from the URL and the key
    pub fn param_opt(mut self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        self.config.set_param(name, value.map(|v| v.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.set_header(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.config.body = body.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cache(mut self, options: CacheOptions) -> Self {
        self.cache = Some(CachePolicy::from(&options));
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    /// Consult `supplier` instead of the cache tiers
    pub fn cache_from<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Option<Value>> + Send + Sync + 'static,
    {
        self.cache_from = Some(Arc::new(supplier));
        self
    }

    pub fn hit_source(mut self, tag: impl Into<DependencyTag>) -> Self {
        self.hit_source.push(tag.into());
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value, &[(String, String)]) -> Result<Value> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn share_request(mut self, share: bool) -> Self {
        self.share_request = Some(share);
        self
    }

    /// Merge context defaults and freeze the descriptor
    pub fn build(self) -> Method {
        let defaults = self.context.config();
        let mut config = self.config;
        config.base_url = defaults.base_url.clone();
        if config.timeout_ms.is_none() {
            config.timeout_ms = defaults.timeout_ms;
        }
        let share_request = self.share_request.unwrap_or(defaults.request_sharing);
        let policy = self
            .cache
            .unwrap_or_else(|| CachePolicy::from(&defaults.cache_options_for(config.verb)));
        let key = config.cache_key();

        Method {
            inner: Arc::new(MethodInner {
                context: self.context,
                config,
                key,
                policy,
                cache_from: self.cache_from,
                hit_source: self.hit_source,
                transform: self.transform,
                share_request,
                name: RwLock::new(self.name),
                from_cache: Mutex::new(None),
                abort: Mutex::new(None),
                progress: Arc::new(ProgressHandlers::default()),
            }),
        }
    }
}
