// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers keeps the defaults in one place.

// =============================================================================
// Engine defaults
// =============================================================================

/// Default number of named descriptors the snapshot registry admits
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 1000;

// =============================================================================
// Context defaults
// =============================================================================

/// Default cache lifetime for GET descriptors in milliseconds (5 minutes)
pub const DEFAULT_GET_CACHE_MS: u64 = 300_000;

/// Default request sharing state
pub const DEFAULT_REQUEST_SHARING: bool = true;

/// Prefix of context ids derived from creation order (`ctx-0`, `ctx-1`, ...)
pub const DEFAULT_CONTEXT_ID_PREFIX: &str = "ctx-";

// =============================================================================
// Cache defaults
// =============================================================================

/// Maximum number of entries held by the volatile tier
pub const DEFAULT_VOLATILE_CAPACITY: u64 = 10_000;

/// Prefix of every key written to a durable tier
pub const DURABLE_KEY_PREFIX: &str = "hikyaku.";

/// Separator between the context id and the cache key in tier keys
pub const TIER_KEY_SEPARATOR: char = '|';

// =============================================================================
// Hook defaults
// =============================================================================

/// Default watcher abortLast policy
pub const DEFAULT_ABORT_LAST: bool = true;

pub const LOADING_STATE_NAME: &str = "loading";
pub const ERROR_STATE_NAME: &str = "error";
pub const DOWNLOADING_STATE_NAME: &str = "downloading";
pub const UPLOADING_STATE_NAME: &str = "uploading";

/// State names owned by the orchestrator that callers may not update
pub const RESERVED_STATE_NAMES: [&str; 4] = [
    LOADING_STATE_NAME,
    ERROR_STATE_NAME,
    DOWNLOADING_STATE_NAME,
    UPLOADING_STATE_NAME,
];

/// Name of the data state of a request/watcher binding
pub const DATA_STATE_NAME: &str = "data";
