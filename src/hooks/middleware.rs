//! Hook middleware
//!
//! A middleware wraps every hook invocation. It receives a `MiddlewareContext`
//! (the descriptor, any cached value, the send arguments, abort and loading
//! control) and a `Next` continuation that actually sends. Not calling `next`
//! suppresses the request; the middleware's return value is then the
//! invocation's result and the loading state is left untouched.

use async_trait::async_trait;
use futures::future::AbortRegistration;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::binding::BindingInner;
use crate::constants::LOADING_STATE_NAME;
use crate::error::Result;
use crate::method::Method;
use crate::pipeline;
use crate::transport::AbortController;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: MiddlewareContext, next: Next) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(MiddlewareContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn handle(&self, ctx: MiddlewareContext, next: Next) -> Result<Value> {
        self(ctx, next).await
    }
}

/// Per-invocation flags shared by the context, `Next` and the driver
#[derive(Debug, Default)]
pub(crate) struct Invocation {
    loading_controlled: AtomicBool,
    settled: AtomicBool,
}

impl Invocation {
    pub fn loading_controlled(&self) -> bool {
        self.loading_controlled.load(Ordering::SeqCst)
    }

    pub fn settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    pub fn mark_settled(&self) {
        self.settled.store(true, Ordering::SeqCst);
    }
}

/// What a middleware sees of the invocation
pub struct MiddlewareContext {
    pub(crate) binding: Arc<BindingInner>,
    pub(crate) method: Method,
    pub(crate) cached: Option<Value>,
    pub(crate) args: Vec<Value>,
    pub(crate) invocation: Arc<Invocation>,
    pub(crate) abort: AbortController,
}

impl MiddlewareContext {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Value already in the cache for this descriptor
    pub fn cached(&self) -> Option<&Value> {
        self.cached.as_ref()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn abort(&self) {
        self.abort.abort();
        self.method.abort();
    }

    /// Take over the loading state: `next` stops setting it
    pub fn control_loading(&self) {
        self.invocation
            .loading_controlled
            .store(true, Ordering::SeqCst);
    }

    pub fn set_loading(&self, loading: bool) {
        self.binding
            .set_states(vec![(LOADING_STATE_NAME, Value::Bool(loading))]);
    }
}

/// Overrides a middleware may pass to `next`
#[derive(Debug, Clone, Default)]
pub struct NextOverrides {
    pub force: Option<bool>,
    /// Send this descriptor instead
    pub method: Option<Method>,
}

/// Continuation that sends the request
pub struct Next {
    pub(crate) binding: Arc<BindingInner>,
    pub(crate) method: Method,
    pub(crate) args: Vec<Value>,
    pub(crate) seq: u64,
    pub(crate) force: bool,
    pub(crate) has_cache: bool,
    pub(crate) invocation: Arc<Invocation>,
    pub(crate) abort: AbortController,
    /// Taken by the first send; later `next` calls register their own
    pub(crate) registration: Mutex<Option<AbortRegistration>>,
}

impl Next {
    pub async fn run(&self) -> Result<Value> {
        self.run_with(NextOverrides::default()).await
    }

    pub async fn run_with(&self, overrides: NextOverrides) -> Result<Value> {
        let force = overrides.force.unwrap_or(self.force);
        let method = overrides.method.unwrap_or_else(|| self.method.clone());

        if (!self.has_cache || force) && !self.invocation.loading_controlled() {
            self.binding
                .set_states(vec![(LOADING_STATE_NAME, Value::Bool(true))]);
        }

        let subscriptions = self.binding.subscribe_progress(&method);
        let registration = self.registration.lock().take();
        let outcome = match registration {
            Some(registration) => {
                pipeline::execute_with(&method, force, self.abort.clone(), registration).await
            }
            None => method.execute(force).await,
        };
        for subscription in subscriptions {
            subscription.unsubscribe();
        }

        self.binding
            .settle(&method, &self.args, self.seq, &outcome, &self.invocation);
        outcome.map(|outcome| outcome.data)
    }
}
