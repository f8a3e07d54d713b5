//! Entry metadata and snapshot entries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Expiration and versioning metadata attached to a cache entry.
///
/// `None` for lifespan or max-idle means the entry never expires on that axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    lifespan: Option<Duration>,
    max_idle: Option<Duration>,
    version: Option<u64>,
}

impl Metadata {
    /// Metadata for an entry that never expires.
    pub fn immortal() -> Self {
        Self::default()
    }

    /// Sets the lifespan.
    pub fn with_lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan = Some(lifespan);
        self
    }

    /// Sets the maximum idle time.
    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    /// Sets the entry version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Returns the lifespan, if any.
    pub fn lifespan(&self) -> Option<Duration> {
        self.lifespan
    }

    /// Returns the maximum idle time, if any.
    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle
    }

    /// Returns the entry version, if any.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Returns `true` if neither lifespan nor max-idle is set.
    pub fn is_immortal(&self) -> bool {
        self.lifespan.is_none() && self.max_idle.is_none()
    }
}

/// A key/value/metadata triple as produced by the entry iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<K, V> {
    key: K,
    value: V,
    metadata: Option<Metadata>,
}

impl<K, V> CacheEntry<K, V> {
    /// Creates an entry without metadata.
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            metadata: None,
        }
    }

    /// Creates an entry carrying metadata.
    pub fn with_metadata(key: K, value: V, metadata: Metadata) -> Self {
        Self {
            key,
            value,
            metadata: Some(metadata),
        }
    }

    /// Returns the key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the metadata, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Splits the entry into its parts.
    pub fn into_parts(self) -> (K, V, Option<Metadata>) {
        (self.key, self.value, self.metadata)
    }
}
