//! Configuration for both Holdpen pipelines

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by `find-archived` and `fetch-delete`.
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldpenConfig {
    /// The holding-pen bucket being reconciled
    #[serde(default = "default_target_bucket")]
    pub target_bucket: String,

    /// Bucket searched for proxies
    #[serde(default = "default_proxy_bucket")]
    pub proxy_bucket: String,

    /// Archive index base URL
    #[serde(default = "default_elastic_url")]
    pub elastic_url: String,

    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Buckets whose copies do not count as archived
    #[serde(default)]
    pub exclude_buckets: Vec<String>,

    /// Per-call timeout for listing, lookups and downloads
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_delete_timeout_secs")]
    pub delete_timeout_secs: u64,

    #[serde(default = "default_lookup_threads")]
    pub lookup_threads: usize,

    #[serde(default = "default_proxy_threads")]
    pub proxy_threads: usize,

    #[serde(default = "default_fetch_threads")]
    pub fetch_threads: usize,

    #[serde(default = "default_delete_threads")]
    pub delete_threads: usize,

    /// Capacity of every stream between stages
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Keys per page when scanning the holding pen
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Most proxies considered per file
    #[serde(default = "default_proxy_page_size")]
    pub proxy_page_size: usize,

    /// Downloads go to `<download_root>/media` and `<download_root>/proxy`
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,
}

fn default_target_bucket() -> String {
    "holding-pen".to_string()
}

fn default_proxy_bucket() -> String {
    "proxies".to_string()
}

fn default_elastic_url() -> String {
    "http://127.0.0.1:9200".to_string()
}

fn default_index_name() -> String {
    "archivehunter".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_delete_timeout_secs() -> u64 {
    3
}

fn default_lookup_threads() -> usize {
    4
}

fn default_proxy_threads() -> usize {
    10
}

fn default_fetch_threads() -> usize {
    4
}

fn default_delete_threads() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    holdpen_pipeline::DEFAULT_CAPACITY
}

fn default_list_page_size() -> usize {
    1000
}

fn default_proxy_page_size() -> usize {
    100
}

fn default_download_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for HoldpenConfig {
    fn default() -> Self {
        Self {
            target_bucket: default_target_bucket(),
            proxy_bucket: default_proxy_bucket(),
            elastic_url: default_elastic_url(),
            index_name: default_index_name(),
            exclude_buckets: Vec::new(),
            timeout_secs: default_timeout_secs(),
            delete_timeout_secs: default_delete_timeout_secs(),
            lookup_threads: default_lookup_threads(),
            proxy_threads: default_proxy_threads(),
            fetch_threads: default_fetch_threads(),
            delete_threads: default_delete_threads(),
            channel_capacity: default_channel_capacity(),
            list_page_size: default_list_page_size(),
            proxy_page_size: default_proxy_page_size(),
            download_root: default_download_root(),
        }
    }
}

impl HoldpenConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: HoldpenConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }

    /// Buckets left out of index lookups: the holding pen itself, then the configured exclusions.
    pub fn lookup_exclusions(&self) -> Vec<String> {
        std::iter::once(self.target_bucket.clone())
            .chain(
                self.exclude_buckets
                    .iter()
                    .filter(|b| !b.is_empty() && **b != self.target_bucket)
                    .cloned(),
            )
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_bucket.is_empty() {
            return Err(ConfigError::Invalid("target bucket must not be empty".into()));
        }
        let counts = [
            ("lookup_threads", self.lookup_threads),
            ("proxy_threads", self.proxy_threads),
            ("fetch_threads", self.fetch_threads),
            ("delete_threads", self.delete_threads),
            ("channel_capacity", self.channel_capacity),
            ("list_page_size", self.list_page_size),
            ("proxy_page_size", self.proxy_page_size),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
        }
        if self.timeout_secs == 0 || self.delete_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = HoldpenConfig::default();
        assert_eq!(config.target_bucket, "holding-pen");
        assert_eq!(config.proxy_bucket, "proxies");
        assert_eq!(config.elastic_url, "http://127.0.0.1:9200");
        assert_eq!(config.index_name, "archivehunter");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.delete_timeout(), Duration::from_secs(3));
        assert_eq!(config.lookup_threads, 4);
        assert_eq!(config.proxy_threads, 10);
        assert_eq!(config.channel_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: HoldpenConfig = toml::from_str(
            r#"
            target_bucket = "staging"
            exclude_buckets = ["scratch"]
            lookup_threads = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.target_bucket, "staging");
        assert_eq!(config.lookup_threads, 8);
        assert_eq!(config.proxy_threads, 10);
        assert_eq!(config.lookup_exclusions(), vec!["staging", "scratch"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("holdpen.toml");
        let mut config = HoldpenConfig::default();
        config.download_root = PathBuf::from("/srv/restore");
        config.exclude_buckets = vec!["a".into(), "b".into()];
        config.save(&path).unwrap();

        let loaded = HoldpenConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_exclusions_skip_target_and_blanks() {
        let mut config = HoldpenConfig::default();
        config.exclude_buckets = vec!["".into(), "holding-pen".into(), "scratch".into()];
        assert_eq!(config.lookup_exclusions(), vec!["holding-pen", "scratch"]);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = HoldpenConfig {
            proxy_threads: 0,
            ..HoldpenConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("proxy_threads"));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "lookup_threads = \"many\"").unwrap();
        assert!(matches!(HoldpenConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
