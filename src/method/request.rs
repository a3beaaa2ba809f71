// Request shape of a descriptor
//
// `RequestConfig` is the fully merged, frozen request a descriptor describes.
// The pre-request interceptor works on a clone of it; the cache key is derived
// from the original and never recomputed.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Request verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
            Verb::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    /// Raw bytes (file, blob, stream contents)
    Binary(Bytes),
    /// Multipart form fields
    Form(Vec<(String, String)>),
    /// `application/x-www-form-urlencoded` fields
    UrlEncoded(Vec<(String, String)>),
}

impl RequestBody {
    /// Special payloads are never cached
    pub fn is_special(&self) -> bool {
        matches!(
            self,
            RequestBody::Binary(_) | RequestBody::Form(_) | RequestBody::UrlEncoded(_)
        )
    }

    /// Representation of the body inside the cache key
    fn key_repr(&self) -> Value {
        match self {
            RequestBody::Empty => Value::Null,
            RequestBody::Json(value) => value.clone(),
            RequestBody::Text(text) => Value::String(text.clone()),
            RequestBody::Binary(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                Value::String(format!("binary:{}", hex::encode(hasher.finalize())))
            }
            RequestBody::Form(fields) => json!({ "form": pairs_to_object(fields) }),
            RequestBody::UrlEncoded(fields) => json!({ "urlencoded": pairs_to_object(fields) }),
        }
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Binary(bytes)
    }
}

fn pairs_to_object(pairs: &[(String, String)]) -> Value {
    let mut map = Map::new();
    for (name, value) in pairs {
        map.insert(name.clone(), Value::String(value.clone()));
    }
    Value::Object(map)
}

/// Resolved request of a descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub verb: Verb,
    pub base_url: String,
    /// Path or full URL as given to the factory
    pub url: String,
    /// Query params in insertion order. `None` values are dropped from the URL.
    pub params: Vec<(String, Option<String>)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    /// Timeout in milliseconds, `None` or 0 = no timeout
    pub timeout_ms: Option<u64>,
}

impl RequestConfig {
    pub fn new(verb: Verb, url: impl Into<String>) -> Self {
        Self {
            verb,
            base_url: String::new(),
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout_ms: None,
        }
    }

    /// Set a param, replacing an earlier value of the same name in place
    pub fn set_param(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
    }

    /// Set a header, replacing an earlier value (names compare case-insensitively)
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Stable cache key of this request
    ///
    /// The key is the JSON rendering of `[verb, url, params, body, headers]`.
    /// Params and headers render as objects with sorted keys so two requests
    /// built in a different order share one key; `None` params are skipped.
    pub fn cache_key(&self) -> String {
        let mut params = Map::new();
        for (name, value) in &self.params {
            if let Some(value) = value {
                params.insert(name.clone(), Value::String(value.clone()));
            }
        }
        let mut headers = Map::new();
        for (name, value) in &self.headers {
            headers.insert(name.to_ascii_lowercase(), Value::String(value.clone()));
        }

        json!([
            self.verb.as_str(),
            join_base(&self.base_url, &self.url),
            params,
            self.body.key_repr(),
            headers,
        ])
        .to_string()
    }
}

/// Join a base URL and a path
///
/// The base's trailing slashes are stripped and the path gets a leading `/`
/// unless it already has one. A path that is a full URL ignores the base.
pub fn join_base(base_url: &str, path: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if path.is_empty() || path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
