//! Holdpen: reconcile a holding-pen bucket against the media archive.
//!
//! - [`discovery`]: list the holding pen, look every file up in the archive index,
//!   find its proxies and write a CSV report
//! - [`cleanup`]: read a report back, download the listed objects and delete them
//! - [`config`]: settings shared by both, loadable from TOML

pub mod cleanup;
pub mod config;
pub mod discovery;

pub use cleanup::{run_cleanup, CleanupOptions, CleanupSummary};
pub use config::{ConfigError, HoldpenConfig};
pub use discovery::{run_discovery, DiscoverySummary};
