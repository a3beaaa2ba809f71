//! Context configuration types.
//!
//! Per-context defaults merged into every descriptor the context builds:
//! - base URL and timeout
//! - request sharing flag
//! - per-verb cache options (GET caches in memory, other verbs do not cache)
//! - durable tier directory and volatile tier capacity

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{from_yaml_with_env, read_config_file};
use crate::cache::CacheOptions;
use crate::constants::{DEFAULT_GET_CACHE_MS, DEFAULT_REQUEST_SHARING, DEFAULT_VOLATILE_CAPACITY};
use crate::method::Verb;

fn default_request_sharing() -> bool {
    DEFAULT_REQUEST_SHARING
}

fn default_volatile_capacity() -> u64 {
    DEFAULT_VOLATILE_CAPACITY
}

/// Context configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Context id used to namespace cache keys
    ///
    /// Defaults to the context's creation order within its engine.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub base_url: String,
    /// Request timeout in milliseconds (default: none)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Share in-flight requests with identical keys (default: true)
    #[serde(default = "default_request_sharing")]
    pub request_sharing: bool,
    /// Cache options per verb, overriding the built-in defaults
    #[serde(default)]
    pub cache_defaults: HashMap<Verb, CacheOptions>,
    /// Directory of the file-backed durable tier (in-process map when absent)
    #[serde(default)]
    pub durable_dir: Option<PathBuf>,
    /// Maximum entries in the volatile tier
    #[serde(default = "default_volatile_capacity")]
    pub volatile_capacity: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            id: None,
            base_url: String::new(),
            timeout_ms: None,
            request_sharing: default_request_sharing(),
            cache_defaults: HashMap::new(),
            durable_dir: None,
            volatile_capacity: default_volatile_capacity(),
        }
    }
}

impl ContextConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, String> {
        let config: ContextConfig = from_yaml_with_env(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        Self::from_yaml_str(&read_config_file(path)?)
    }

    /// Cache options a descriptor of `verb` starts from
    pub fn cache_options_for(&self, verb: Verb) -> CacheOptions {
        match self.cache_defaults.get(&verb) {
            Some(options) => options.clone(),
            None if verb == Verb::Get => CacheOptions::memory(DEFAULT_GET_CACHE_MS),
            None => CacheOptions::disabled(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(id) = &self.id {
            if id.is_empty() {
                return Err("Context id cannot be empty".to_string());
            }
        }

        if !self.base_url.is_empty()
            && !self.base_url.starts_with('/')
            && !self.base_url.starts_with("http://")
            && !self.base_url.starts_with("https://")
        {
            return Err(format!(
                "base_url '{}' must be a path or an http(s) URL",
                self.base_url
            ));
        }

        if self.volatile_capacity == 0 {
            return Err("volatile_capacity must be greater than 0".to_string());
        }

        for (verb, options) in &self.cache_defaults {
            options
                .validate()
                .map_err(|e| format!("Invalid cache defaults for {}: {}", verb, e))?;
        }

        Ok(())
    }
}
