//! The object store as the pipelines see it.

use crate::error::StoreError;
use std::fmt;
use std::io::Read;
use std::time::Duration;

/// One listed object. `key` is the key as the lookup stage expects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// Plain string prefix, not a directory.
    pub prefix: Option<String>,
    /// Token from the previous page.
    pub continuation: Option<String>,
    pub max_keys: usize,
    /// Return keys form-encoded per path segment (S3 `EncodingType=url`).
    pub url_encoded: bool,
}

impl ListRequest {
    pub fn all(max_keys: usize) -> Self {
        Self {
            max_keys,
            ..Self::default()
        }
    }

    pub fn with_prefix(prefix: impl Into<String>, max_keys: usize) -> Self {
        Self {
            prefix: Some(prefix.into()),
            max_keys,
            ..Self::default()
        }
    }

    pub fn url_encoded(mut self) -> Self {
        self.url_encoded = true;
        self
    }

    pub fn after(&self, continuation: impl Into<String>) -> Self {
        Self {
            continuation: Some(continuation.into()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    /// `None` on the last page.
    pub next_continuation: Option<String>,
}

/// Body of a fetched object, read synchronously.
pub struct RemoteObject {
    pub content_length: i64,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Blocking access to buckets, shared by all stage workers.
///
/// Every call is bounded by `timeout`.
pub trait BucketStore: Send + Sync {
    fn list_page(
        &self,
        bucket: &str,
        request: &ListRequest,
        timeout: Duration,
    ) -> Result<ListPage, StoreError>;

    fn get(&self, bucket: &str, key: &str, timeout: Duration) -> Result<RemoteObject, StoreError>;

    fn delete(&self, bucket: &str, key: &str, timeout: Duration) -> Result<(), StoreError>;
}
