use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StrataError, StrataResult};
use crate::types::NodeId;

/// Top-level configuration (`strata.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub flatten: FlattenConfig,
    #[serde(default)]
    pub cache: FlattenCacheConfig,
    #[serde(default)]
    pub cluster: ClusterFlattenConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node ID in cluster.
    pub node_id: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { node_id: 1 }
    }
}

impl NodeConfig {
    pub fn id(&self) -> NodeId {
        NodeId(self.node_id)
    }
}

/// Per-shard flatten transform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenConfig {
    /// Maximum rows per generated page (virtual default pages, loaded pages).
    pub max_page_rows: usize,
    /// Value synthesized for absent LONG entries (length columns always use 0).
    pub default_long: i64,
    /// Value synthesized for absent DOUBLE entries.
    pub default_double: f64,
    /// Value synthesized for absent STRING entries.
    pub default_string: String,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            max_page_rows: 65_536,
            default_long: 0,
            default_double: 0.0,
            default_string: String::new(),
        }
    }
}

/// Flatten cache manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenCacheConfig {
    /// How many recent flattenings to keep in memory per (table, flatten-by).
    pub memory_instances_per_key: usize,
    /// Upper bound on flatten ids that stay resolvable in memory.
    pub memory_max_flatten_ids: usize,
    /// In-memory instances older than this are evicted (seconds, 0 = never).
    pub memory_ttl_secs: u64,
    /// Directory of the on-disk flattened-table cache. Empty = disabled.
    pub disk_dir: String,
    /// Disk entries older than this are ignored (seconds, 0 = no bound).
    pub disk_max_age_secs: u64,
}

impl Default for FlattenCacheConfig {
    fn default() -> Self {
        Self {
            memory_instances_per_key: 2,
            memory_max_flatten_ids: 1024,
            memory_ttl_secs: 3600,
            disk_dir: String::new(),
            disk_max_age_secs: 0,
        }
    }
}

impl FlattenCacheConfig {
    pub fn memory_ttl(&self) -> Option<Duration> {
        (self.memory_ttl_secs > 0).then(|| Duration::from_secs(self.memory_ttl_secs))
    }

    pub fn disk_max_age(&self) -> Option<Duration> {
        (self.disk_max_age_secs > 0).then(|| Duration::from_secs(self.disk_max_age_secs))
    }

    pub fn disk_enabled(&self) -> bool {
        !self.disk_dir.is_empty()
    }
}

/// Cluster flatten coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterFlattenConfig {
    /// Total budget for one `ensure_flattened` call, retries included.
    pub flatten_timeout_ms: u64,
    /// Fixed backoff between retries after a connection failure.
    pub retry_backoff_ms: u64,
}

impl Default for ClusterFlattenConfig {
    fn default() -> Self {
        Self {
            flatten_timeout_ms: 300_000,
            retry_backoff_ms: 1_000,
        }
    }
}

impl ClusterFlattenConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.flatten_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl StrataConfig {
    /// Parse a TOML document. Missing sections take their defaults.
    pub fn from_toml_str(content: &str) -> StrataResult<Self> {
        toml::from_str(content).map_err(|e| StrataError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> StrataResult<String> {
        toml::to_string_pretty(self).map_err(|e| StrataError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file is absent or
    /// malformed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config {}: {}, using defaults",
                        path.display(),
                        e
                    );
                    StrataConfig::default()
                }
            },
            Err(_) => {
                tracing::info!("Config file {} not found, using defaults", path.display());
                StrataConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = StrataConfig::from_toml_str(
            r#"
            [cluster]
            flatten_timeout_ms = 500

            [flatten]
            default_string = "n/a"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cluster.flatten_timeout_ms, 500);
        assert_eq!(cfg.cluster.retry_backoff_ms, 1_000);
        assert_eq!(cfg.flatten.default_string, "n/a");
        assert_eq!(cfg.flatten.max_page_rows, 65_536);
        assert!(!cfg.cache.disk_enabled());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = StrataConfig::from_toml_str("[cluster\nflatten_timeout_ms = ").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_default_roundtrips_through_toml() {
        let text = StrataConfig::default().to_toml_string().unwrap();
        let back = StrataConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.cache.memory_instances_per_key, 2);
        assert_eq!(back.cache.disk_max_age(), None);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StrataConfig::load_or_default(dir.path().join("absent.toml"));
        assert_eq!(cfg.node.id(), NodeId(1));
    }
}
