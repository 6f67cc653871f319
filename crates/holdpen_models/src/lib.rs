//! Holdpen record types
//!
//! - [`FoundEntry`]: one object in one bucket
//! - [`LookupResult`]: the reconciliation outcome for one holding-pen file
//! - [`ArchiveEntry`]: the document the archive index stores per archived object
//! - [`report`]: the CSV report written by discovery and read back by cleanup

pub mod archive_entry;
pub mod error;
pub mod found_entry;
pub mod keys;
pub mod lookup_result;
pub mod report;

pub use archive_entry::ArchiveEntry;
pub use error::{ModelError, Result};
pub use found_entry::FoundEntry;
pub use lookup_result::LookupResult;
pub use report::{ReportReader, ReportWriter};
