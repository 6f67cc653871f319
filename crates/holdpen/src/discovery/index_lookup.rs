use holdpen_models::keys::query_unescape;
use holdpen_models::{ArchiveEntry, LookupResult};
use holdpen_pipeline::{Emitter, Failure, Transform};
use holdpen_remote::{ArchiveIndex, ObjectSummary, TermQuery};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const STAGE_NAME: &str = "index-lookup";

/// Looks each listed key up in the archive index, outside the excluded buckets.
pub struct IndexLookup {
    index: Arc<dyn ArchiveIndex>,
    index_name: String,
    exclude_buckets: Vec<String>,
    timeout: Duration,
}

impl IndexLookup {
    pub fn new(
        index: Arc<dyn ArchiveIndex>,
        index_name: impl Into<String>,
        exclude_buckets: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            index,
            index_name: index_name.into(),
            exclude_buckets,
            timeout,
        }
    }
}

impl Transform for IndexLookup {
    type Input = ObjectSummary;
    type Output = LookupResult;

    fn apply(&self, object: ObjectSummary, out: &mut Emitter<'_, LookupResult>) -> Result<(), Failure> {
        let path = match query_unescape(&object.key) {
            Ok(path) => path,
            Err(err) => {
                warn!(key = %object.key, error = %err, "cannot decode key, skipping");
                return Ok(());
            }
        };

        let query = TermQuery::new(path.as_str(), self.exclude_buckets.clone());
        let response = self
            .index
            .search(&self.index_name, &query, self.timeout)
            .map_err(|err| {
                error!(file = %path, error = %err, "index search failed");
                Failure::fatal(err)
            })?;

        let mut result = LookupResult::new(path, object.size);
        result.count = response.total_hits;
        for hit in response.hits {
            match ArchiveEntry::from_value(hit) {
                Ok(entry) => result.entries.push(entry.to_found_entry()),
                Err(err) => {
                    warn!(file = %result.requested_file, error = %err, "malformed index hit, skipping")
                }
            }
        }
        debug!(
            file = %result.requested_file,
            count = result.count,
            entries = result.entries.len(),
            "looked up file"
        );
        out.emit(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdpen_pipeline::collect_outputs;
    use holdpen_remote::memory::MemoryIndex;
    use serde_json::json;

    fn lookup(index: Arc<MemoryIndex>) -> IndexLookup {
        IndexLookup::new(
            index,
            "archivehunter",
            vec!["holding-pen".into(), "scratch".into()],
            Duration::from_secs(1),
        )
    }

    fn object(key: &str, size: i64) -> ObjectSummary {
        ObjectSummary {
            key: key.to_string(),
            size,
        }
    }

    #[test]
    fn decodes_key_and_maps_hits() {
        let index = Arc::new(MemoryIndex::new());
        index.add(json!({"bucket": "deep-archive", "path": "media/clip one.mxf", "size": 42}));
        index.add(json!({"bucket": "holding-pen", "path": "media/clip one.mxf", "size": 42}));
        index.add(json!({"bucket": "scratch", "path": "media/clip one.mxf", "size": 42}));

        let (out, result) = collect_outputs(&lookup(Arc::clone(&index)), object("media/clip+one.mxf", 42));
        assert!(result.is_ok());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].requested_file, "media/clip one.mxf");
        assert_eq!(out[0].requested_file_size, 42);
        assert_eq!(out[0].count, 1);
        assert_eq!(out[0].entries[0].bucket, "deep-archive");

        let queries = index.queries();
        assert_eq!(queries[0].path, "media/clip one.mxf");
        assert_eq!(queries[0].exclude_buckets, vec!["holding-pen", "scratch"]);
    }

    #[test]
    fn undecodable_key_is_skipped() {
        let index = Arc::new(MemoryIndex::new());
        let (out, result) = collect_outputs(&lookup(Arc::clone(&index)), object("bad%zz.mxf", 1));
        assert!(result.is_ok());
        assert!(out.is_empty());
        assert!(index.queries().is_empty());
    }

    #[test]
    fn search_failure_is_fatal() {
        let index = Arc::new(MemoryIndex::new());
        index.fail_on("a.mxf");
        let (out, result) = collect_outputs(&lookup(index), object("a.mxf", 1));
        assert!(out.is_empty());
        assert!(matches!(result, Err(Failure::Fatal(_))));
    }

    #[test]
    fn malformed_hits_are_dropped_but_counted() {
        let index = Arc::new(MemoryIndex::new());
        index.add(json!({"bucket": "deep-archive", "path": "a.mxf", "size": "huge"}));
        index.add(json!({"bucket": "nearline", "path": "a.mxf", "size": 3}));

        let (out, _) = collect_outputs(&lookup(index), object("a.mxf", 3));
        assert_eq!(out[0].count, 2);
        assert_eq!(out[0].entries.len(), 1);
        assert_eq!(out[0].entries[0].bucket, "nearline");
    }
}
