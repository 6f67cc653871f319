use holdpen_models::{FoundEntry, LookupResult};
use holdpen_pipeline::{Emitter, Failure, Transform};
use tracing::warn;

pub const STAGE_NAME: &str = "entry-fanout";

/// More proxies than this for one file points at bad data; they are left out.
pub const MAX_PROXIES: usize = 3;

/// Expands each report row into the original file followed by its proxies.
pub struct EntryFanout {
    root_bucket: String,
}

impl EntryFanout {
    pub fn new(root_bucket: impl Into<String>) -> Self {
        Self {
            root_bucket: root_bucket.into(),
        }
    }

    fn root_entry(&self, result: &LookupResult) -> FoundEntry {
        FoundEntry::new(
            &self.root_bucket,
            &result.requested_file,
            result.requested_file_size,
        )
    }
}

impl Transform for EntryFanout {
    type Input = LookupResult;
    type Output = FoundEntry;

    fn apply(&self, result: LookupResult, out: &mut Emitter<'_, FoundEntry>) -> Result<(), Failure> {
        out.emit(self.root_entry(&result))?;

        if result.proxies.len() > MAX_PROXIES {
            warn!(
                file = %result.requested_file,
                proxies = result.proxies.len(),
                "suspiciously many proxies, ignoring them"
            );
            return Ok(());
        }
        for proxy in result.proxies {
            out.emit(proxy)?;
        }
        Ok(())
    }
}
