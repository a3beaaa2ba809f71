//! Transport contract
//!
//! The engine never puts bytes on the wire itself. A `Transport` receives the
//! fully resolved request (URL with query string, headers, body, timeout) and
//! returns a response; everything around it (cache, sharing, abort, timeout
//! enforcement, response handling) is the pipeline's job.

use async_trait::async_trait;
use futures::future::{AbortHandle, AbortRegistration};
use serde_json::Value;
use std::sync::Arc;

use crate::error::TransportError;
use crate::method::progress::{Direction, ProgressHandlers};
use crate::method::{Method, Progress, RequestBody, Verb};

/// Request as handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RequestShape {
    /// Base + path + query string
    pub url: String,
    pub verb: Verb,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout_ms: Option<u64>,
}

/// Raw transport output
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl TransportResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Progress reporting handle passed to `Transport::dispatch`
#[derive(Clone, Default)]
pub struct ProgressSink {
    handlers: Option<Arc<ProgressHandlers>>,
}

impl ProgressSink {
    pub(crate) fn for_method(method: &Method) -> Self {
        Self {
            handlers: Some(method.progress_handlers()),
        }
    }

    /// Sink that drops every report
    pub fn none() -> Self {
        Self::default()
    }

    pub fn download(&self, progress: Progress) {
        if let Some(handlers) = &self.handlers {
            handlers.emit(Direction::Download, progress);
        }
    }

    pub fn upload(&self, progress: Progress) {
        if let Some(handlers) = &self.handlers {
            handlers.emit(Direction::Upload, progress);
        }
    }
}

/// Pluggable request dispatcher
///
/// Implementations must be cancel-safe: an aborted or timed out request drops
/// the returned future.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(
        &self,
        request: RequestShape,
        method: &Method,
        progress: ProgressSink,
    ) -> Result<TransportResponse, TransportError>;
}

/// Cancellation handle of one send
///
/// Created before the cache check so an `abort()` that arrives before the
/// transport is reached still cancels the dispatch.
#[derive(Debug, Clone)]
pub struct AbortController {
    handle: AbortHandle,
}

impl AbortController {
    pub fn new() -> (Self, AbortRegistration) {
        let (handle, registration) = AbortHandle::new_pair();
        (Self { handle }, registration)
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.handle.is_aborted()
    }
}
