// Snapshot registry
//
// Name-indexed store of descriptors that completed a send. Used to resolve
// matchers (name, pattern, filter) into concrete descriptors for the cache API,
// state updates and dependency invalidation.
//
// Capacity counts stored descriptors. Once full, new descriptors are refused
// (no eviction) so names registered early stay resolvable.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::method::Method;

/// Predicate applied to name-matched candidates
pub type MethodFilter = Arc<dyn Fn(&Method) -> bool + Send + Sync>;

/// Name part of a detailed matcher
#[derive(Clone)]
pub enum NameMatcher {
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Exact(exact) => exact == name,
            NameMatcher::Pattern(pattern) => pattern.is_match(name),
        }
    }
}

/// Which descriptors an operation targets
#[derive(Clone)]
pub enum Matcher {
    /// This descriptor, whether registered or not
    Method(Method),
    /// These descriptors, whether registered or not
    Methods(Vec<Method>),
    /// Registered descriptors with exactly this name
    Name(String),
    /// Registered descriptors whose name matches
    Pattern(Regex),
    /// Registered descriptors passing both the name matcher and the filter
    Filter {
        name: Option<NameMatcher>,
        filter: Option<MethodFilter>,
    },
}

impl Matcher {
    pub fn name(name: impl Into<String>) -> Self {
        Matcher::Name(name.into())
    }

    /// Pattern matcher; a malformed pattern is a configuration error
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Matcher::Pattern)
            .map_err(|e| EngineError::Config(format!("Invalid matcher pattern '{}': {}", pattern, e)))
    }

    pub fn filter<F>(name: Option<NameMatcher>, filter: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        Matcher::Filter {
            name,
            filter: Some(Arc::new(filter)),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Method(method) => f.debug_tuple("Method").field(method).finish(),
            Matcher::Methods(methods) => f.debug_tuple("Methods").field(&methods.len()).finish(),
            Matcher::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Matcher::Pattern(pattern) => f.debug_tuple("Pattern").field(&pattern.as_str()).finish(),
            Matcher::Filter { name, filter } => f
                .debug_struct("Filter")
                .field("name", &name.is_some())
                .field("filter", &filter.is_some())
                .finish(),
        }
    }
}

impl From<Method> for Matcher {
    fn from(method: Method) -> Self {
        Matcher::Method(method)
    }
}

impl From<&Method> for Matcher {
    fn from(method: &Method) -> Self {
        Matcher::Method(method.clone())
    }
}

impl From<Vec<Method>> for Matcher {
    fn from(methods: Vec<Method>) -> Self {
        Matcher::Methods(methods)
    }
}

impl From<&str> for Matcher {
    fn from(name: &str) -> Self {
        Matcher::Name(name.to_string())
    }
}

impl From<Regex> for Matcher {
    fn from(pattern: Regex) -> Self {
        Matcher::Pattern(pattern)
    }
}

#[derive(Default)]
struct Snapshots {
    by_name: HashMap<String, Vec<Method>>,
    // Names in first-registration order
    order: Vec<String>,
    count: usize,
}

/// Bounded registry of sent descriptors
pub struct SnapshotRegistry {
    capacity: usize,
    inner: Mutex<Snapshots>,
}

impl SnapshotRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Snapshots::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a named descriptor
    ///
    /// A descriptor with the same name and key replaces the stored one. Unnamed
    /// descriptors and descriptors arriving while the registry is full are
    /// ignored.
    pub fn save(&self, method: &Method) {
        let Some(name) = method.name() else {
            return;
        };

        let mut inner = self.inner.lock();
        if let Some(stored) = inner
            .by_name
            .get_mut(&name)
            .and_then(|list| list.iter_mut().find(|m| m.key() == method.key()))
        {
            *stored = method.clone();
            return;
        }

        if inner.count >= self.capacity {
            debug!(name = %name, capacity = self.capacity, "Snapshot registry full, not admitting descriptor");
            return;
        }

        inner.count += 1;
        match inner.by_name.get_mut(&name) {
            Some(list) => list.push(method.clone()),
            None => {
                inner.by_name.insert(name.clone(), vec![method.clone()]);
                inner.order.push(name);
            }
        }
    }

    /// All registered descriptors in registration order
    pub fn all(&self) -> Vec<Method> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|name| inner.by_name.get(name))
            .flatten()
            .cloned()
            .collect()
    }

    /// Resolve a matcher
    ///
    /// Returns every match when `match_all` is true, otherwise at most the
    /// first one. Descriptor matchers are returned verbatim.
    pub fn matches(&self, matcher: &Matcher, match_all: bool) -> Vec<Method> {
        let mut found = match matcher {
            Matcher::Method(method) => vec![method.clone()],
            Matcher::Methods(methods) => methods.clone(),
            Matcher::Name(name) => self
                .inner
                .lock()
                .by_name
                .get(name)
                .cloned()
                .unwrap_or_default(),
            Matcher::Pattern(pattern) => self.collect_by_name(|name| pattern.is_match(name)),
            Matcher::Filter { name, filter } => {
                let candidates = match name {
                    Some(name_matcher) => self.collect_by_name(|n| name_matcher.matches(n)),
                    None => self.all(),
                };
                match filter {
                    Some(filter) => candidates.into_iter().filter(|m| filter(m)).collect(),
                    None => candidates,
                }
            }
        };

        if !match_all {
            found.truncate(1);
        }
        found
    }

    /// First match of a matcher
    pub fn match_one(&self, matcher: &Matcher) -> Option<Method> {
        self.matches(matcher, false).into_iter().next()
    }

    fn collect_by_name(&self, predicate: impl Fn(&str) -> bool) -> Vec<Method> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter(|name| predicate(name))
            .filter_map(|name| inner.by_name.get(name))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.inner.lock() = Snapshots::default();
    }
}
