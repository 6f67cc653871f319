use super::CleanupCounters;
use holdpen_models::keys::normalize_object_key;
use holdpen_models::FoundEntry;
use holdpen_pipeline::{Emitter, Failure, Transform};
use holdpen_remote::BucketStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const STAGE_NAME: &str = "delete";

/// Terminal stage: removes each entry from its bucket, or only logs the request
/// when running dry.
pub struct Deleter {
    store: Arc<dyn BucketStore>,
    really_delete: bool,
    timeout: Duration,
    counters: Arc<CleanupCounters>,
}

impl Deleter {
    pub fn new(
        store: Arc<dyn BucketStore>,
        really_delete: bool,
        timeout: Duration,
        counters: Arc<CleanupCounters>,
    ) -> Self {
        Self {
            store,
            really_delete,
            timeout,
            counters,
        }
    }
}

impl Transform for Deleter {
    type Input = FoundEntry;
    type Output = ();

    fn admit(&self, entry: &FoundEntry) -> bool {
        entry.is_addressable()
    }

    fn apply(&self, entry: FoundEntry, _out: &mut Emitter<'_, ()>) -> Result<(), Failure> {
        if !entry.is_addressable() {
            return Ok(());
        }
        let key = match normalize_object_key(&entry.path) {
            Ok(key) => key,
            Err(err) => {
                warn!(path = %entry.path, error = %err, "cannot decode path, skipping");
                self.counters.skip();
                return Ok(());
            }
        };

        info!(bucket = %entry.bucket, key = %key, "request to delete");
        if !self.really_delete {
            info!("not deleting unless --really-delete is set");
            self.counters.dry_run();
            return Ok(());
        }

        self.store
            .delete(&entry.bucket, &key, self.timeout)
            .map_err(|err| {
                error!(bucket = %entry.bucket, key = %key, error = %err, "cannot delete");
                Failure::fatal(err)
            })?;
        self.counters.deleted();
        Ok(())
    }
}
