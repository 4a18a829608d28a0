//! Backend, cache and store configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical layout of ordered many-valued features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EncodingKind {
    /// One record per position plus a size record.
    #[default]
    Indexed,
    /// One packed blob per feature.
    Array,
    /// A persistent doubly linked list.
    List,
}

impl EncodingKind {
    /// Every encoding, in declaration order.
    pub const ALL: [Self; 3] = [Self::Indexed, Self::Array, Self::List];

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::Array => "array",
            Self::List => "list",
        }
    }
}

impl fmt::Display for EncodingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingKind {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "indexed" => Ok(Self::Indexed),
            "array" => Ok(Self::Array),
            "list" => Ok(Self::List),
            other => Err(CoreError::invalid_format(format!(
                "unknown encoding '{other}' (expected indexed, array or list)"
            ))),
        }
    }
}

/// Configuration for a key-value backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Layout of many-valued features.
    pub encoding: EncodingKind,

    /// Whether to maintain a class-to-instances index.
    pub instance_index: bool,

    /// Whether instance lookups without an index may scan every class
    /// binding instead of failing.
    pub scan_fallback: bool,

    /// Number of lock stripes guarding per-feature critical sections.
    pub lock_stripes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            encoding: EncodingKind::Indexed,
            instance_index: true,
            scan_fallback: false,
            lock_stripes: 64,
        }
    }
}

impl BackendConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the many-valued encoding.
    #[must_use]
    pub const fn encoding(mut self, encoding: EncodingKind) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets whether to maintain the instance index.
    #[must_use]
    pub const fn instance_index(mut self, value: bool) -> Self {
        self.instance_index = value;
        self
    }

    /// Sets whether unindexed instance lookups may scan.
    #[must_use]
    pub const fn scan_fallback(mut self, value: bool) -> Self {
        self.scan_fallback = value;
        self
    }

    /// Sets the number of lock stripes (at least one is always used).
    #[must_use]
    pub const fn lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }
}

/// Configuration for the feature caching decorator.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached feature entries.
    pub capacity: usize,

    /// Whether to also cache class bindings.
    pub cache_classes: bool,

    /// Number of lock stripes serializing loads and mutations per feature.
    pub lock_stripes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            cache_classes: true,
            lock_stripes: 64,
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entry capacity.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets whether class bindings are cached.
    #[must_use]
    pub const fn cache_classes(mut self, value: bool) -> Self {
        self.cache_classes = value;
        self
    }

    /// Sets the number of lock stripes.
    #[must_use]
    pub const fn lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }
}

/// Configuration for the store façade.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of reified entity handles kept in memory.
    pub reified_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reified_capacity: 1_000,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reified handle capacity.
    #[must_use]
    pub const fn reified_capacity(mut self, capacity: usize) -> Self {
        self.reified_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = BackendConfig::default();
        assert_eq!(config.encoding, EncodingKind::Indexed);
        assert!(config.instance_index);
        assert!(!config.scan_fallback);
    }

    #[test]
    fn builder_pattern() {
        let config = BackendConfig::new()
            .encoding(EncodingKind::List)
            .instance_index(false)
            .scan_fallback(true)
            .lock_stripes(4);

        assert_eq!(config.encoding, EncodingKind::List);
        assert!(!config.instance_index);
        assert!(config.scan_fallback);
        assert_eq!(config.lock_stripes, 4);

        let cache = CacheConfig::new().capacity(8).cache_classes(false);
        assert_eq!(cache.capacity, 8);
        assert!(!cache.cache_classes);
    }

    #[test]
    fn encoding_names() {
        for kind in EncodingKind::ALL {
            assert_eq!(kind.to_string().parse::<EncodingKind>().unwrap(), kind);
        }
        assert_eq!("ARRAY".parse::<EncodingKind>().unwrap(), EncodingKind::Array);
        assert!("btree".parse::<EncodingKind>().is_err());
    }
}
