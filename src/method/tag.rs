// Dependency tags
//
// A tag links two descriptors: when one succeeds the other's cache is
// dropped. Descriptor inputs are resolved to their cache key when the tag is
// built so later renames do not change what the tag points at.

use regex::Regex;
use std::fmt;

use super::Method;

/// One declared cache dependency
#[derive(Clone)]
pub enum DependencyTag {
    /// Matches a descriptor name, or a cache key equal to the string
    Name(String),
    /// Matches descriptor names against the pattern
    Pattern(Regex),
    /// Matches exactly one cache key
    Key(String),
}

impl DependencyTag {
    pub fn matches(&self, name: Option<&str>, key: &str) -> bool {
        match self {
            DependencyTag::Name(tag) => name == Some(tag.as_str()) || tag == key,
            DependencyTag::Pattern(pattern) => name.is_some_and(|n| pattern.is_match(n)),
            DependencyTag::Key(tag) => tag == key,
        }
    }
}

impl fmt::Debug for DependencyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyTag::Name(name) => f.debug_tuple("Name").field(name).finish(),
            DependencyTag::Pattern(pattern) => {
                f.debug_tuple("Pattern").field(&pattern.as_str()).finish()
            }
            DependencyTag::Key(key) => f.debug_tuple("Key").field(key).finish(),
        }
    }
}

impl From<&str> for DependencyTag {
    fn from(name: &str) -> Self {
        DependencyTag::Name(name.to_string())
    }
}

impl From<String> for DependencyTag {
    fn from(name: String) -> Self {
        DependencyTag::Name(name)
    }
}

impl From<Regex> for DependencyTag {
    fn from(pattern: Regex) -> Self {
        DependencyTag::Pattern(pattern)
    }
}

impl From<&Method> for DependencyTag {
    fn from(method: &Method) -> Self {
        DependencyTag::Key(method.key().to_string())
    }
}
