use holdpen_models::{FoundEntry, LookupResult};
use holdpen_pipeline::{Emitter, Failure, Transform};
use holdpen_remote::{BucketStore, ListRequest};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

pub const STAGE_NAME: &str = "proxy-locator";

static EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\.([^.]+)$").expect("extension pattern is valid"));

/// Strip the final extension from `filename`.
///
/// Returns the prefix and whether an extension was found; without one the whole
/// name is the prefix.
pub fn prefix_from_filename(filename: &str) -> (&str, bool) {
    match EXTENSION.captures(filename).and_then(|caps| caps.get(1)) {
        Some(stem) => (stem.as_str(), true),
        None => (filename, false),
    }
}

/// Finds proxies for each result by listing the proxy bucket under the file's stem.
///
/// A failed listing loses that one record and is reported as degraded.
pub struct ProxyLocator {
    store: Arc<dyn BucketStore>,
    proxy_bucket: String,
    max_keys: usize,
    timeout: Duration,
}

impl ProxyLocator {
    pub fn new(
        store: Arc<dyn BucketStore>,
        proxy_bucket: impl Into<String>,
        max_keys: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            proxy_bucket: proxy_bucket.into(),
            max_keys,
            timeout,
        }
    }
}

impl Transform for ProxyLocator {
    type Input = LookupResult;
    type Output = LookupResult;

    fn apply(&self, mut result: LookupResult, out: &mut Emitter<'_, LookupResult>) -> Result<(), Failure> {
        let (prefix, has_extension) = prefix_from_filename(&result.requested_file);
        if !has_extension {
            warn!(file = %result.requested_file, "no extension, searching proxies by full name");
        }

        let request = ListRequest::with_prefix(prefix, self.max_keys);
        let page = self
            .store
            .list_page(&self.proxy_bucket, &request, self.timeout)
            .map_err(|err| {
                warn!(
                    file = %result.requested_file,
                    bucket = %self.proxy_bucket,
                    error = %err,
                    "proxy search failed, dropping record"
                );
                Failure::degraded(err)
            })?;

        if !page.objects.is_empty() {
            debug!(
                file = %result.requested_file,
                count = page.objects.len(),
                "found proxies"
            );
            result.proxies = page
                .objects
                .into_iter()
                .map(|object| FoundEntry::proxy(&self.proxy_bucket, object.key, object.size))
                .collect();
        }
        out.emit(result)
    }
}
