//! Notifier configuration types and builders.

use std::time::Duration;

use gridnotify_core::GridError;

/// Default cache name.
const DEFAULT_CACHE_NAME: &str = "default";
/// Default number of hash segments.
const DEFAULT_NUM_SEGMENTS: usize = 256;
/// Default deadline for replicating a cluster listener to every member.
const DEFAULT_REPLICATION_TIMEOUT: Duration = Duration::from_secs(15);
/// Default deadline for removing a cluster listener from every member.
const DEFAULT_REMOVAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for GridError {
    fn from(err: ConfigError) -> Self {
        GridError::Configuration(err.message)
    }
}

/// How the cache distributes its data across the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheMode {
    /// Single member, no clustering.
    #[default]
    Local,
    /// Every member holds every entry.
    Replicated,
    /// Members drop their copy when another member writes.
    Invalidation,
    /// Entries live on the owners of their hash segment.
    Distributed,
}

impl CacheMode {
    /// Returns `true` for any mode that spans more than one member.
    pub fn is_clustered(self) -> bool {
        !matches!(self, Self::Local)
    }

    /// Returns `true` for distributed (segment-owned) caches.
    pub fn is_distributed(self) -> bool {
        matches!(self, Self::Distributed)
    }

    /// Returns `true` for invalidation caches.
    pub fn is_invalidation(self) -> bool {
        matches!(self, Self::Invalidation)
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "replicated" | "repl" => Some(Self::Replicated),
            "invalidation" | "inval" => Some(Self::Invalidation),
            "distributed" | "dist" => Some(Self::Distributed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Replicated => "replicated",
            Self::Invalidation => "invalidation",
            Self::Distributed => "distributed",
        };
        f.write_str(name)
    }
}

/// Configuration of a [`CacheNotifier`](crate::CacheNotifier).
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    cache_name: String,
    cache_mode: CacheMode,
    num_segments: usize,
    replication_timeout: Duration,
    removal_timeout: Duration,
    async_dispatch: bool,
}

impl NotifierConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> NotifierConfigBuilder {
        NotifierConfigBuilder::new()
    }

    /// Returns the cache name used in log output.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Returns the cache mode.
    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    /// Returns the number of hash segments.
    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    /// Returns the deadline for installing a cluster listener on all members.
    pub fn replication_timeout(&self) -> Duration {
        self.replication_timeout
    }

    /// Returns the deadline for removing a cluster listener from all members.
    pub fn removal_timeout(&self) -> Duration {
        self.removal_timeout
    }

    /// Returns `true` if listeners registered with `sync(false)` are invoked
    /// on the runtime's blocking pool instead of the notifying thread.
    pub fn async_dispatch(&self) -> bool {
        self.async_dispatch
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            cache_mode: CacheMode::default(),
            num_segments: DEFAULT_NUM_SEGMENTS,
            replication_timeout: DEFAULT_REPLICATION_TIMEOUT,
            removal_timeout: DEFAULT_REMOVAL_TIMEOUT,
            async_dispatch: true,
        }
    }
}

/// Builder for [`NotifierConfig`].
#[derive(Debug, Clone, Default)]
pub struct NotifierConfigBuilder {
    cache_name: Option<String>,
    cache_mode: Option<CacheMode>,
    num_segments: Option<usize>,
    replication_timeout: Option<Duration>,
    removal_timeout: Option<Duration>,
    async_dispatch: Option<bool>,
}

impl NotifierConfigBuilder {
    /// Creates a new builder with every setting unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache name.
    pub fn cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = Some(name.into());
        self
    }

    /// Sets the cache mode.
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = Some(mode);
        self
    }

    /// Sets the number of hash segments.
    pub fn num_segments(mut self, num_segments: usize) -> Self {
        self.num_segments = Some(num_segments);
        self
    }

    /// Sets the cluster listener replication deadline.
    pub fn replication_timeout(mut self, timeout: Duration) -> Self {
        self.replication_timeout = Some(timeout);
        self
    }

    /// Sets the cluster listener removal deadline.
    pub fn removal_timeout(mut self, timeout: Duration) -> Self {
        self.removal_timeout = Some(timeout);
        self
    }

    /// Enables or disables off-thread delivery for non-sync listeners.
    pub fn async_dispatch(mut self, enabled: bool) -> Self {
        self.async_dispatch = Some(enabled);
        self
    }

    /// Builds the configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `cache_name` is empty
    /// - `num_segments` is zero
    /// - either timeout is zero
    pub fn build(self) -> Result<NotifierConfig, ConfigError> {
        let defaults = NotifierConfig::default();
        let cache_name = self.cache_name.unwrap_or(defaults.cache_name);
        let num_segments = self.num_segments.unwrap_or(defaults.num_segments);
        let replication_timeout = self
            .replication_timeout
            .unwrap_or(defaults.replication_timeout);
        let removal_timeout = self.removal_timeout.unwrap_or(defaults.removal_timeout);

        if cache_name.trim().is_empty() {
            return Err(ConfigError::new("cache_name must not be empty"));
        }
        if num_segments == 0 {
            return Err(ConfigError::new("num_segments must be at least 1"));
        }
        if replication_timeout.is_zero() {
            return Err(ConfigError::new("replication_timeout must be non-zero"));
        }
        if removal_timeout.is_zero() {
            return Err(ConfigError::new("removal_timeout must be non-zero"));
        }

        Ok(NotifierConfig {
            cache_name,
            cache_mode: self.cache_mode.unwrap_or(defaults.cache_mode),
            num_segments,
            replication_timeout,
            removal_timeout,
            async_dispatch: self.async_dispatch.unwrap_or(defaults.async_dispatch),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NotifierConfig::default();
        assert_eq!(config.cache_name(), DEFAULT_CACHE_NAME);
        assert_eq!(config.cache_mode(), CacheMode::Local);
        assert_eq!(config.num_segments(), DEFAULT_NUM_SEGMENTS);
        assert_eq!(config.replication_timeout(), DEFAULT_REPLICATION_TIMEOUT);
        assert!(config.async_dispatch());
    }

    #[test]
    fn test_builder_overrides() {
        let config = NotifierConfig::builder()
            .cache_name("orders")
            .cache_mode(CacheMode::Distributed)
            .num_segments(4)
            .replication_timeout(Duration::from_millis(250))
            .removal_timeout(Duration::from_secs(1))
            .async_dispatch(false)
            .build()
            .unwrap();

        assert_eq!(config.cache_name(), "orders");
        assert!(config.cache_mode().is_distributed());
        assert_eq!(config.num_segments(), 4);
        assert_eq!(config.replication_timeout(), Duration::from_millis(250));
        assert_eq!(config.removal_timeout(), Duration::from_secs(1));
        assert!(!config.async_dispatch());
    }

    #[test]
    fn test_builder_rejects_empty_cache_name() {
        let err = NotifierConfig::builder().cache_name("  ").build().unwrap_err();
        assert!(err.to_string().contains("cache_name"));
    }

    #[test]
    fn test_builder_rejects_zero_segments() {
        let err = NotifierConfig::builder().num_segments(0).build().unwrap_err();
        assert!(err.to_string().contains("num_segments"));
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        assert!(NotifierConfig::builder()
            .replication_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(NotifierConfig::builder()
            .removal_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_cache_mode_predicates() {
        assert!(!CacheMode::Local.is_clustered());
        assert!(CacheMode::Replicated.is_clustered());
        assert!(CacheMode::Invalidation.is_invalidation());
        assert!(!CacheMode::Replicated.is_distributed());
    }

    #[test]
    fn test_cache_mode_parse() {
        assert_eq!(CacheMode::parse("DIST"), Some(CacheMode::Distributed));
        assert_eq!(CacheMode::parse("replicated"), Some(CacheMode::Replicated));
        assert_eq!(CacheMode::parse("scattered"), None);
    }

    #[test]
    fn test_config_error_converts_to_grid_error() {
        let err: GridError = ConfigError::new("bad").into();
        assert!(matches!(err, GridError::Configuration(ref m) if m == "bad"));
    }

    #[test]
    fn test_config_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NotifierConfig>();
        assert_send_sync::<ConfigError>();
    }
}
