// Error types module

use thiserror::Error;

/// Failure reported by a transport adapter
///
/// Cloneable so one shared in-flight result can be handed to every caller
/// that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    /// Optional status code reported by the transport (HTTP status etc.)
    pub status: Option<u16>,
    /// Human readable failure description
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

/// Centralized error type for the engine
///
/// Configuration mistakes are fatal at construction and transport failures
/// are per call. Cache tier failures never reach this type.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Invalid or conflicting configuration (second state adapter, bad matcher pattern)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport failed to produce a response
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request was aborted before it settled
    #[error("Request aborted")]
    Aborted,

    /// The request did not settle within its timeout
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Programmer error (missing adapter, unmatched matcher, reserved state name)
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Error raised by user code (responded handler, transform, middleware, factory)
    #[error("Handler error: {0}")]
    Handler(String),
}

impl EngineError {
    /// True when the error came from cancelling the request
    pub fn is_abort(&self) -> bool {
        matches!(self, EngineError::Aborted)
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
