//! Declarative configuration loading from TOML and environment variables.
//!
//! [`FileConfig`] mirrors [`NotifierConfig`](crate::config::NotifierConfig)
//! with serde-friendly types and is converted through the builder API.
//!
//! # Example TOML
//!
//! ```toml
//! cache-name = "orders"
//! cache-mode = "distributed"
//! num-segments = 128
//! replication-timeout-ms = 10000
//! removal-timeout-ms = 5000
//! async-dispatch = true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{CacheMode, ConfigError, NotifierConfig, NotifierConfigBuilder};

/// File-based notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    /// Cache name.
    pub cache_name: Option<String>,
    /// Cache mode: "local", "replicated", "invalidation" or "distributed".
    pub cache_mode: Option<String>,
    /// Number of hash segments.
    pub num_segments: Option<usize>,
    /// Cluster listener replication deadline in milliseconds.
    pub replication_timeout_ms: Option<u64>,
    /// Cluster listener removal deadline in milliseconds.
    pub removal_timeout_ms: Option<u64>,
    /// Whether non-sync listeners are invoked off the notifying thread.
    pub async_dispatch: Option<bool>,
}

impl TryFrom<FileConfig> for NotifierConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let mut builder = NotifierConfigBuilder::new();

        if let Some(name) = file.cache_name {
            builder = builder.cache_name(name);
        }
        if let Some(mode) = file.cache_mode {
            let parsed = CacheMode::parse(&mode)
                .ok_or_else(|| ConfigError::new(format!("unknown cache mode: {mode}")))?;
            builder = builder.cache_mode(parsed);
        }
        if let Some(n) = file.num_segments {
            builder = builder.num_segments(n);
        }
        if let Some(ms) = file.replication_timeout_ms {
            builder = builder.replication_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = file.removal_timeout_ms {
            builder = builder.removal_timeout(Duration::from_millis(ms));
        }
        if let Some(enabled) = file.async_dispatch {
            builder = builder.async_dispatch(enabled);
        }
        builder.build()
    }
}

impl NotifierConfig {
    /// Loads configuration from a TOML file.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::new(format!("failed to read TOML config file: {e}"))
        })?;
        let file_config: FileConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::new(format!("failed to parse TOML config: {e}")))?;
        file_config.try_into()
    }

    /// Loads configuration from environment variables.
    ///
    /// | Variable | Maps to |
    /// |----------|---------|
    /// | `GRIDNOTIFY_CACHE_NAME` | `cache_name` |
    /// | `GRIDNOTIFY_CACHE_MODE` | `cache_mode` |
    /// | `GRIDNOTIFY_NUM_SEGMENTS` | `num_segments` |
    /// | `GRIDNOTIFY_REPLICATION_TIMEOUT_MS` | Replication deadline in milliseconds |
    /// | `GRIDNOTIFY_REMOVAL_TIMEOUT_MS` | Removal deadline in milliseconds |
    /// | `GRIDNOTIFY_ASYNC_DISPATCH` | `"true"` or `"false"` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut file_config = FileConfig::default();
        if let Some(val) = lookup("GRIDNOTIFY_CACHE_NAME") {
            file_config.cache_name = Some(val);
        }
        if let Some(val) = lookup("GRIDNOTIFY_CACHE_MODE") {
            file_config.cache_mode = Some(val);
        }
        if let Some(val) = lookup("GRIDNOTIFY_NUM_SEGMENTS") {
            if let Ok(n) = val.parse::<usize>() {
                file_config.num_segments = Some(n);
            }
        }
        if let Some(val) = lookup("GRIDNOTIFY_REPLICATION_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                file_config.replication_timeout_ms = Some(ms);
            }
        }
        if let Some(val) = lookup("GRIDNOTIFY_REMOVAL_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                file_config.removal_timeout_ms = Some(ms);
            }
        }
        if let Some(val) = lookup("GRIDNOTIFY_ASYNC_DISPATCH") {
            file_config.async_dispatch = Some(val.eq_ignore_ascii_case("true"));
        }
        file_config.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_file_config_defaults_produce_valid_config() {
        let config: NotifierConfig = FileConfig::default().try_into().unwrap();
        assert_eq!(config.cache_name(), "default");
        assert_eq!(config.cache_mode(), CacheMode::Local);
    }

    #[test]
    fn test_file_config_with_all_fields() {
        let file_config = FileConfig {
            cache_name: Some("orders".to_string()),
            cache_mode: Some("dist".to_string()),
            num_segments: Some(8),
            replication_timeout_ms: Some(500),
            removal_timeout_ms: Some(700),
            async_dispatch: Some(false),
        };
        let config: NotifierConfig = file_config.try_into().unwrap();
        assert_eq!(config.cache_name(), "orders");
        assert_eq!(config.cache_mode(), CacheMode::Distributed);
        assert_eq!(config.num_segments(), 8);
        assert_eq!(config.replication_timeout(), Duration::from_millis(500));
        assert_eq!(config.removal_timeout(), Duration::from_millis(700));
        assert!(!config.async_dispatch());
    }

    #[test]
    fn test_file_config_rejects_unknown_mode() {
        let file_config = FileConfig {
            cache_mode: Some("scattered".to_string()),
            ..Default::default()
        };
        let err = NotifierConfig::try_from(file_config).unwrap_err();
        assert!(err.to_string().contains("unknown cache mode"));
    }

    #[test]
    fn test_file_config_validation_propagates() {
        let file_config = FileConfig {
            num_segments: Some(0),
            ..Default::default()
        };
        assert!(NotifierConfig::try_from(file_config).is_err());
    }

    #[test]
    fn test_from_lookup_reads_variables() {
        let vars: HashMap<&str, &str> = [
            ("GRIDNOTIFY_CACHE_NAME", "sessions"),
            ("GRIDNOTIFY_CACHE_MODE", "replicated"),
            ("GRIDNOTIFY_NUM_SEGMENTS", "16"),
            ("GRIDNOTIFY_ASYNC_DISPATCH", "FALSE"),
        ]
        .into_iter()
        .collect();
        let config =
            NotifierConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.cache_name(), "sessions");
        assert_eq!(config.cache_mode(), CacheMode::Replicated);
        assert_eq!(config.num_segments(), 16);
        assert!(!config.async_dispatch());
    }

    #[test]
    fn test_from_lookup_ignores_unparseable_numbers() {
        let config = NotifierConfig::from_lookup(|name| {
            (name == "GRIDNOTIFY_NUM_SEGMENTS").then(|| "many".to_string())
        })
        .unwrap();
        assert_eq!(config.num_segments(), 256);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_toml_file() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "cache-name = \"orders\"").unwrap();
        writeln!(file, "cache-mode = \"distributed\"").unwrap();
        writeln!(file, "num-segments = 32").unwrap();
        let config = NotifierConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.cache_name(), "orders");
        assert_eq!(config.num_segments(), 32);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_toml_missing_file() {
        let err = NotifierConfig::from_toml("/nonexistent/gridnotify.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
