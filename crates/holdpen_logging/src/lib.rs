//! Shared logging utilities for Holdpen binaries.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "holdpen=info,holdpen_pipeline=info";
const HOME_ENV: &str = "HOLDPEN_HOME";
const HOME_DIR_NAME: &str = ".holdpen";

/// Logging configuration for one binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Console shows debug output regardless of `RUST_LOG`.
    pub verbose: bool,
    /// Skip the log file and write to stderr only.
    pub console_only: bool,
}

/// Keeps the background file writer alive. Hold it until the process exits.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install a stderr layer and, when the logs directory is usable, a daily rolling
/// file layer under [`logs_dir`]. `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`].
pub fn init_logging(config: LogConfig<'_>) -> Result<LoggingGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let mut file_guard = None;
    let file_layer = if config.console_only {
        None
    } else {
        match ensure_logs_dir() {
            Ok(log_dir) => {
                let appender =
                    tracing_appender::rolling::daily(log_dir, format!("{}.log", config.app_name));
                let (writer, guard) = tracing_appender::non_blocking(appender);
                file_guard = Some(guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_filter(env_filter.clone()),
                )
            }
            Err(err) => {
                eprintln!("Warning: failed to create logs directory: {:#}", err);
                None
            }
        }
    };

    let console_filter = if config.verbose {
        EnvFilter::new(verbose_filter())
    } else {
        env_filter
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LoggingGuard { _file: file_guard })
}

fn verbose_filter() -> String {
    DEFAULT_LOG_FILTER.replace("=info", "=debug")
}

/// The Holdpen home directory: `$HOLDPEN_HOME`, or `~/.holdpen`.
pub fn holdpen_home() -> Result<PathBuf> {
    resolve_home(std::env::var_os(HOME_ENV), dirs::home_dir())
}

fn resolve_home(override_path: Option<OsString>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    home.map(|h| h.join(HOME_DIR_NAME))
        .context("Could not determine home directory; set HOLDPEN_HOME")
}

/// The logs directory: `<home>/logs`.
pub fn logs_dir() -> Result<PathBuf> {
    Ok(holdpen_home()?.join("logs"))
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir()?;
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_home() {
        let home = resolve_home(Some("/srv/holdpen".into()), Some(PathBuf::from("/home/me"))).unwrap();
        assert_eq!(home, PathBuf::from("/srv/holdpen"));
    }

    #[test]
    fn empty_override_is_ignored() {
        let home = resolve_home(Some(OsString::new()), Some(PathBuf::from("/home/me"))).unwrap();
        assert_eq!(home, PathBuf::from("/home/me/.holdpen"));
    }

    #[test]
    fn no_home_is_an_error() {
        assert!(resolve_home(None, None).is_err());
    }

    #[test]
    fn verbose_raises_every_target() {
        assert_eq!(verbose_filter(), "holdpen=debug,holdpen_pipeline=debug");
    }
}
