// Hikyaku request engine library
//
// Request descriptors, a two-tier cache with TTL, request sharing,
// dependency invalidation and reactive hook bindings.

pub mod cache;
pub mod clock;
pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod method;
pub mod pipeline;
pub mod sharing;
pub mod snapshot;
pub mod transport;

pub use cache::{CacheMode, CacheOptions, CachePolicy, Expire, ReadScope};
pub use config::{AutoInvalidateScope, ContextConfig, GlobalConfig};
pub use context::{Context, ContextOptions, ErrorLogger};
pub use engine::Engine;
pub use error::{EngineError, Result, TransportError};
pub use hooks::{Hook, HookEvent, HookKind, HookOptions, MethodSource, WatchAdapter};
pub use method::{DependencyTag, Method, MethodBuilder, RequestBody, Verb};
pub use pipeline::{RequestInterceptor, RespondedHandler, SendOutcome};
pub use snapshot::Matcher;
pub use transport::{ProgressSink, RequestShape, Transport, TransportResponse};
