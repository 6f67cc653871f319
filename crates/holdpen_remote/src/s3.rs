//! [`BucketStore`] over `object_store`, one store per bucket.
//!
//! Calls are made from plain worker threads and driven to completion on a shared
//! tokio runtime through its [`Handle`]. Never call these methods from inside
//! that runtime.

use crate::error::StoreError;
use crate::store::{BucketStore, ListPage, ListRequest, ObjectSummary, RemoteObject};
use bytes::{Buf, Bytes};
use futures::stream::BoxStream;
use futures::{future, StreamExt, TryStreamExt};
use holdpen_models::keys::encode_key;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use std::collections::HashMap;
use std::future::Future;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

pub struct S3BucketStore {
    handle: Handle,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl S3BucketStore {
    /// Buckets are configured on first use from the AWS environment
    /// (`AWS_REGION`, `AWS_ACCESS_KEY_ID`, `AWS_ENDPOINT`, ...).
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Use `store` for `bucket` instead of building one from the environment.
    pub fn with_bucket(self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        if let Ok(mut stores) = self.stores.lock() {
            stores.insert(bucket.into(), store);
        }
        self
    }

    fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StoreError> {
        let mut stores = self.stores.lock().map_err(|_| StoreError::Configure {
            bucket: bucket.to_string(),
            message: "store registry lock poisoned".to_string(),
        })?;
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let s3 = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|err| StoreError::Configure {
                bucket: bucket.to_string(),
                message: err.to_string(),
            })?;
        let store: Arc<dyn ObjectStore> = Arc::new(s3);
        debug!(bucket, "configured object store");
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn run<F, T>(
        &self,
        operation: &'static str,
        bucket: &str,
        timeout: Duration,
        fut: F,
    ) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match self
            .handle
            .block_on(async move { tokio::time::timeout(timeout, fut).await })
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                bucket: bucket.to_string(),
                timeout,
            }),
        }
    }
}

impl BucketStore for S3BucketStore {
    fn list_page(
        &self,
        bucket: &str,
        request: &ListRequest,
        timeout: Duration,
    ) -> Result<ListPage, StoreError> {
        let store = self.store_for(bucket)?;
        let prefix = request.prefix.clone().unwrap_or_default();
        // object_store lists directories; narrow to the string prefix ourselves
        let parent = match prefix.rfind('/') {
            Some(i) => Some(object_path(&prefix[..i])?),
            None => None,
        };
        // Listing starts after the offset, so begin just before the prefix to keep a
        // key equal to the prefix itself.
        let offset = match &request.continuation {
            Some(token) => Some(object_path(token)?),
            None => before_prefix(&prefix),
        };
        let max_keys = request.max_keys.max(1);

        let mut listed: Vec<ObjectMeta> = self.run("list", bucket, timeout, async move {
            let stream = match &offset {
                Some(offset) => store.list_with_offset(parent.as_ref(), offset),
                None => store.list(parent.as_ref()),
            };
            stream
                .try_skip_while(|meta| {
                    let key = meta.location.as_ref();
                    future::ready(Ok(!key.starts_with(prefix.as_str()) && key < prefix.as_str()))
                })
                .try_take_while(|meta| {
                    future::ready(Ok(meta.location.as_ref().starts_with(prefix.as_str())))
                })
                .take(max_keys + 1)
                .try_collect()
                .await
                .map_err(StoreError::from)
        })?;

        let next_continuation = if listed.len() > max_keys {
            listed.truncate(max_keys);
            listed.last().map(|meta| meta.location.to_string())
        } else {
            None
        };

        let objects = listed
            .into_iter()
            .map(|meta| {
                let raw = meta.location.to_string();
                ObjectSummary {
                    key: if request.url_encoded { encode_key(&raw) } else { raw },
                    size: meta.size as i64,
                }
            })
            .collect::<Vec<_>>();
        debug!(
            bucket,
            count = objects.len(),
            truncated = next_continuation.is_some(),
            "listed page"
        );

        Ok(ListPage {
            objects,
            next_continuation,
        })
    }

    fn get(&self, bucket: &str, key: &str, timeout: Duration) -> Result<RemoteObject, StoreError> {
        let store = self.store_for(bucket)?;
        let path = object_path(key)?;
        let result = self.run("get", bucket, timeout, async move {
            store.get(&path).await.map_err(StoreError::from)
        });
        let result = match result {
            Err(err) if err.is_not_found() => {
                return Err(StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            other => other?,
        };

        let content_length = result.meta.size as i64;
        Ok(RemoteObject {
            content_length,
            body: Box::new(BlockingBody {
                handle: self.handle.clone(),
                stream: result.into_stream(),
                chunk: Bytes::new(),
                timeout,
                bucket: bucket.to_string(),
            }),
        })
    }

    fn delete(&self, bucket: &str, key: &str, timeout: Duration) -> Result<(), StoreError> {
        let store = self.store_for(bucket)?;
        let path = object_path(key)?;
        self.run("delete", bucket, timeout, async move {
            store.delete(&path).await.map_err(StoreError::from)
        })
    }
}

/// The store path naming exactly `key`. `Path::from` would escape characters such
/// as `[` or `#` and address a different object.
fn object_path(key: &str) -> Result<Path, StoreError> {
    Path::parse(key).map_err(|err| StoreError::InvalidKey {
        key: key.to_string(),
        message: err.to_string(),
    })
}

/// A listing offset that sorts before every key starting with `prefix`: the prefix
/// minus its last character. `None` lists from the start.
fn before_prefix(prefix: &str) -> Option<Path> {
    let mut chars = prefix.chars();
    chars.next_back()?;
    let shorter = chars.as_str();
    if shorter.is_empty() {
        return None;
    }
    Path::parse(shorter).ok()
}

/// Synchronous reader over a streamed object body. Each chunk is bounded by the
/// timeout of the originating request.
struct BlockingBody {
    handle: Handle,
    stream: BoxStream<'static, object_store::Result<Bytes>>,
    chunk: Bytes,
    timeout: Duration,
    bucket: String,
}

impl Read for BlockingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.chunk.is_empty() {
            let stream = &mut self.stream;
            let timeout = self.timeout;
            let next = self
                .handle
                .block_on(async move { tokio::time::timeout(timeout, stream.next()).await });
            match next {
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("read from bucket '{}' timed out after {:?}", self.bucket, timeout),
                    ))
                }
                Ok(None) => return Ok(0),
                Ok(Some(Err(err))) => return Err(io::Error::new(io::ErrorKind::Other, err)),
                Ok(Some(Ok(chunk))) => self.chunk = chunk,
            }
        }

        let n = buf.len().min(self.chunk.len());
        buf[..n].copy_from_slice(&self.chunk[..n]);
        self.chunk.advance(n);
        Ok(n)
    }
}
