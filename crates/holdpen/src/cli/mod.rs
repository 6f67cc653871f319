//! Command-line front end for the two pipelines.
//!
//! Flags override the loaded [`HoldpenConfig`]; anything not given on the command
//! line keeps its configured or default value.

pub mod fetch_delete;
pub mod find_archived;

use anyhow::Context;
use holdpen::HoldpenConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_FILE: &str = "config.toml";

/// Load `explicit`, or `<holdpen home>/config.toml` when present, or the defaults.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<HoldpenConfig> {
    if let Some(path) = explicit {
        return HoldpenConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }
    match default_config_path() {
        Some(path) if path.is_file() => {
            debug!(path = %path.display(), "loading config");
            HoldpenConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        _ => Ok(HoldpenConfig::default()),
    }
}

fn default_config_path() -> Option<PathBuf> {
    holdpen_logging::holdpen_home()
        .ok()
        .map(|home| home.join(CONFIG_FILE))
}

fn set<T>(slot: &mut T, value: &Option<T>)
where
    T: Clone,
{
    if let Some(value) = value {
        *slot = value.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let err = load_config(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn explicit_config_is_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("holdpen.toml");
        std::fs::write(&path, "target_bucket = \"pen-2\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.target_bucket, "pen-2");
        assert_eq!(config.proxy_bucket, "proxies");
    }

    #[test]
    fn set_only_overrides_given_values() {
        let mut threads = 4usize;
        set(&mut threads, &None);
        assert_eq!(threads, 4);
        set(&mut threads, &Some(8));
        assert_eq!(threads, 8);
    }
}
