//! Source stage: page through the holding-pen bucket.

use holdpen_pipeline::{spawn_source, Failure, StageHandle};
use holdpen_remote::{BucketStore, ListRequest, ObjectSummary};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, Span};

pub const STAGE_NAME: &str = "bucket-scan";

pub struct BucketScan {
    pub store: Arc<dyn BucketStore>,
    pub bucket: String,
    pub page_size: usize,
    pub timeout: Duration,
}

impl BucketScan {
    /// Start listing. Keys are emitted form-encoded, page by page; a listing
    /// failure ends the scan without an end-of-stream marker.
    pub fn spawn(
        self,
        capacity: usize,
        parent: &Span,
    ) -> holdpen_pipeline::Result<StageHandle<ObjectSummary>> {
        spawn_source(STAGE_NAME, capacity, parent, move |tx| {
            let mut request = ListRequest::all(self.page_size).url_encoded();
            let mut pages = 0u64;
            loop {
                let page = self
                    .store
                    .list_page(&self.bucket, &request, self.timeout)
                    .map_err(|err| {
                        error!(bucket = %self.bucket, error = %err, "cannot list bucket");
                        Failure::fatal(err)
                    })?;
                pages += 1;
                debug!(
                    bucket = %self.bucket,
                    page = pages,
                    count = page.objects.len(),
                    more = page.next_continuation.is_some(),
                    "listed page"
                );

                for object in page.objects {
                    tx.send(object)?;
                }

                match page.next_continuation {
                    Some(token) => request = request.after(token),
                    None => break,
                }
            }
            info!(bucket = %self.bucket, pages, "completed listing");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdpen_pipeline::Envelope;
    use holdpen_remote::memory::MemoryBucketStore;

    fn scan(store: Arc<MemoryBucketStore>, page_size: usize) -> StageHandle<ObjectSummary> {
        BucketScan {
            store,
            bucket: "pen".into(),
            page_size,
            timeout: Duration::from_secs(1),
        }
        .spawn(10, &Span::none())
        .unwrap()
    }

    #[test]
    fn emits_every_page_then_one_sentinel() {
        let store = Arc::new(MemoryBucketStore::new());
        for i in 0..7 {
            store.put("pen", &format!("clip {}.mxf", i), vec![0u8; i]);
        }
        let handle = scan(Arc::clone(&store), 3);

        let mut keys = Vec::new();
        loop {
            match handle.output.recv().unwrap() {
                Envelope::Record(object) => keys.push(object.key),
                Envelope::Sentinel => break,
            }
        }
        assert_eq!(keys.len(), 7);
        assert_eq!(keys[0], "clip+0.mxf");
        assert_eq!(store.list_calls().len(), 3);
        assert!(handle.output.recv().is_err());
    }

    #[test]
    fn listing_failure_is_fatal_and_unterminated() {
        let store = Arc::new(MemoryBucketStore::new());
        for i in 0..5 {
            store.put("pen", &format!("{}.mxf", i), vec![1]);
        }
        store.fail_list_after("pen", 1, "access denied");
        let handle = scan(store, 2);

        let records: Vec<_> = handle.output.records().collect();
        assert_eq!(records.len(), 2);

        let err = handle.errors.recv().unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("access denied"));
    }
}
