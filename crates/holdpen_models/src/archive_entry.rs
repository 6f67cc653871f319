use crate::found_entry::FoundEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The document the archive index keeps for each archived object.
///
/// Missing fields take their zero value so that sparse documents still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchiveEntry {
    pub id: String,
    pub bucket: String,
    pub path: String,
    pub region: Option<String>,
    pub extension: Option<String>,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: String,
    pub mime_type: serde_json::Value,
    pub proxied: bool,
    pub storage_class: String,
    pub been_deleted: bool,
}

impl ArchiveEntry {
    pub fn from_value(value: serde_json::Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_found_entry(&self) -> FoundEntry {
        FoundEntry::new(&self.bucket, &self.path, self.size)
    }
}
