//! Execution pipeline
//!
//! One logical send of a descriptor:
//! 1. cache check (controlled supplier or cache tiers), skipped when forced
//! 2. pre-request interceptor on a clone of the request, then dispatch through
//!    request sharing with the timeout applied
//! 3. responded handler and per-descriptor transform
//! 4. post-process: snapshot registration, dependency invalidation, cache write
//!
//! Steps 2 and 3 run under the send's abort registration, so an `abort()` that
//! happens before dispatch still cancels it.

use async_trait::async_trait;
use futures::future::{AbortRegistration, Abortable};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::cache::ReadScope;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::method::request::join_base;
use crate::method::{Method, RequestConfig};
use crate::sharing::SharingSlot;
use crate::transport::{AbortController, ProgressSink, RequestShape, TransportResponse};

/// Data of a settled send
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendOutcome {
    pub data: Value,
    pub from_cache: bool,
}

/// Hook run before every dispatch
///
/// Receives a clone of the descriptor's request; changes affect this dispatch
/// only and never the cache key.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn before_request(&self, request: &mut RequestConfig, method: &Method) -> Result<()>;
}

/// Unified response handling of a context
///
/// `on_error` returning `Ok` turns a transport failure into data; such data is
/// delivered but never cached.
#[async_trait]
pub trait RespondedHandler: Send + Sync {
    async fn on_success(&self, response: TransportResponse, _method: &Method) -> Result<Value> {
        Ok(response.body)
    }

    async fn on_error(&self, error: EngineError, _method: &Method) -> Result<Value> {
        Err(error)
    }

    async fn on_complete(&self, _method: &Method, _outcome: &Result<Value>) {}
}

/// Responded handler returning the response body and rethrowing errors
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResponded;

impl RespondedHandler for DefaultResponded {}

/// Final URL of a request: base + path + query string
///
/// Params with no value are dropped; the rest keep their order.
pub fn build_url(request: &RequestConfig) -> String {
    let mut url = join_base(&request.base_url, &request.url);

    let query: Vec<String> = request
        .params
        .iter()
        .filter_map(|(name, value)| {
            value.as_ref().map(|value| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
        })
        .collect();

    if !query.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query.join("&"));
    }
    url
}

/// Run one send of `method`
pub async fn execute(method: &Method, force: bool) -> Result<SendOutcome> {
    let (controller, registration) = AbortController::new();
    execute_with(method, force, controller, registration).await
}

/// Run one send under an abort registration created by the caller
///
/// Hooks create the pair when an invocation starts, so a supersede that
/// lands before the send is reached still cancels it.
pub(crate) async fn execute_with(
    method: &Method,
    force: bool,
    controller: AbortController,
    registration: AbortRegistration,
) -> Result<SendOutcome> {
    let context = method.context().clone();
    let engine = context.engine()?;

    method.set_abort(controller.clone());

    if !force {
        let cached = match method.cache_supplier() {
            Some(supplier) => supplier().await,
            None => context.coordinator().lookup(method).await,
        };
        if let Some(data) = cached {
            method.set_from_cache(true);
            return Ok(SendOutcome {
                data,
                from_cache: true,
            });
        }
    }
    method.set_from_cache(false);

    let dispatched = Abortable::new(dispatch(&engine, method, controller), registration)
        .await
        .unwrap_or(Err(EngineError::Aborted));

    let responded = context.responded();
    let (result, cacheable) = match dispatched {
        Ok(response) => (respond(method, response).await, true),
        Err(err) => {
            debug!(key = %method.key(), error = %err, "Dispatch failed");
            (responded.on_error(err, method).await, false)
        }
    };
    responded.on_complete(method, &result).await;
    let data = result?;

    if cacheable {
        post_process(&engine, method, &data).await;
    }

    Ok(SendOutcome {
        data,
        from_cache: false,
    })
}

async fn dispatch(
    engine: &Engine,
    method: &Method,
    controller: AbortController,
) -> Result<TransportResponse> {
    let context = method.context();

    let mut request = method.config().clone();
    if let Some(interceptor) = context.interceptor() {
        interceptor.before_request(&mut request, method).await?;
    }

    let shape = RequestShape {
        url: build_url(&request),
        verb: request.verb,
        headers: request.headers,
        body: request.body,
        timeout_ms: request.timeout_ms,
    };

    if !method.share_request() {
        return call_transport(method, shape).await;
    }

    match engine
        .sharing()
        .acquire(context.id(), method.key(), controller)
    {
        SharingSlot::Leader(guard) => {
            let result = call_transport(method, shape).await;
            guard.complete(result.clone());
            result
        }
        SharingSlot::Follower(shared) => {
            debug!(key = %method.key(), "Sharing in-flight request");
            shared.wait().await
        }
    }
}

async fn call_transport(method: &Method, shape: RequestShape) -> Result<TransportResponse> {
    let transport = method.context().transport();
    let progress = ProgressSink::for_method(method);

    match shape.timeout_ms {
        Some(timeout_ms) if timeout_ms > 0 => {
            let call = transport.dispatch(shape, method, progress);
            match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
                Ok(result) => result.map_err(EngineError::from),
                Err(_) => Err(EngineError::Timeout(timeout_ms)),
            }
        }
        _ => transport
            .dispatch(shape, method, progress)
            .await
            .map_err(EngineError::from),
    }
}

async fn respond(method: &Method, response: TransportResponse) -> Result<Value> {
    let headers = response.headers.clone();
    let data = method
        .context()
        .responded()
        .on_success(response, method)
        .await?;
    match method.transform() {
        Some(transform) => transform(data, &headers),
        None => Ok(data),
    }
}

async fn post_process(engine: &Engine, method: &Method, data: &Value) {
    let context = method.context();
    engine.snapshots().save(method);

    let peers = engine.coordinators();
    context
        .coordinator()
        .invalidate_by_dependency(
            method,
            engine.snapshots(),
            engine.config().auto_invalidate_scope,
            &peers,
        )
        .await;

    if method.config().body.is_special() {
        debug!(key = %method.key(), "Special request body, skipping cache write");
        return;
    }
    // Tier failures are logged by the coordinator and never fail the send
    context
        .coordinator()
        .write(method, data, ReadScope::All)
        .await;
}
