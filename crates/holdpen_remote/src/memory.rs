//! In-memory store and index for tests.

use crate::error::{IndexError, StoreError};
use crate::index::{ArchiveIndex, SearchResponse, TermQuery};
use crate::store::{BucketStore, ListPage, ListRequest, ObjectSummary, RemoteObject};
use holdpen_models::keys::encode_key;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::ops::Bound;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Buckets {
    objects: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    list_failures: HashMap<String, (usize, String)>,
    get_failures: HashSet<(String, String)>,
    delete_failures: HashSet<(String, String)>,
    short_bodies: HashSet<(String, String)>,
    list_calls: Vec<(String, ListRequest)>,
    gets: Vec<(String, String)>,
    deletes: Vec<(String, String)>,
}

/// Buckets held in memory, with failure injection and a log of calls.
#[derive(Default)]
pub struct MemoryBucketStore {
    inner: Mutex<Buckets>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.with(|b| {
            b.objects
                .entry(bucket.to_string())
                .or_default()
                .insert(key.to_string(), data.into());
        })
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.with(|b| b.objects.get(bucket).is_some_and(|o| o.contains_key(key)))
    }

    /// List calls on `bucket` succeed `pages` times, then fail with `message`.
    pub fn fail_list_after(&self, bucket: &str, pages: usize, message: &str) {
        self.with(|b| {
            b.list_failures
                .insert(bucket.to_string(), (pages, message.to_string()));
        })
    }

    pub fn fail_get(&self, bucket: &str, key: &str) {
        self.with(|b| {
            b.get_failures.insert((bucket.to_string(), key.to_string()));
        })
    }

    pub fn fail_delete(&self, bucket: &str, key: &str) {
        self.with(|b| {
            b.delete_failures.insert((bucket.to_string(), key.to_string()));
        })
    }

    /// Report the full length for `key` but deliver only half of its bytes.
    pub fn short_body(&self, bucket: &str, key: &str) {
        self.with(|b| {
            b.short_bodies.insert((bucket.to_string(), key.to_string()));
        })
    }

    pub fn list_calls(&self) -> Vec<(String, ListRequest)> {
        self.with(|b| b.list_calls.clone())
    }

    pub fn gets(&self) -> Vec<(String, String)> {
        self.with(|b| b.gets.clone())
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.with(|b| b.deletes.clone())
    }

    fn with<T>(&self, f: impl FnOnce(&mut Buckets) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl BucketStore for MemoryBucketStore {
    fn list_page(
        &self,
        bucket: &str,
        request: &ListRequest,
        _timeout: Duration,
    ) -> Result<ListPage, StoreError> {
        self.with(|b| {
            b.list_calls.push((bucket.to_string(), request.clone()));
            if let Some((remaining, message)) = b.list_failures.get_mut(bucket) {
                if *remaining == 0 {
                    return Err(StoreError::Rejected(message.clone()));
                }
                *remaining -= 1;
            }

            let empty = BTreeMap::new();
            let objects = b.objects.get(bucket).unwrap_or(&empty);
            let prefix = request.prefix.as_deref().unwrap_or("");
            let lower = match &request.continuation {
                Some(token) => Bound::Excluded(token.clone()),
                None => Bound::Included(prefix.to_string()),
            };
            let max_keys = request.max_keys.max(1);

            let mut listed: Vec<(String, i64)> = objects
                .range((lower, Bound::Unbounded))
                .filter(|(key, _)| key.starts_with(prefix))
                .take(max_keys + 1)
                .map(|(key, data)| (key.clone(), data.len() as i64))
                .collect();
            let next_continuation = if listed.len() > max_keys {
                listed.truncate(max_keys);
                listed.last().map(|(key, _)| key.clone())
            } else {
                None
            };

            Ok(ListPage {
                objects: listed
                    .into_iter()
                    .map(|(key, size)| ObjectSummary {
                        key: if request.url_encoded { encode_key(&key) } else { key },
                        size,
                    })
                    .collect(),
                next_continuation,
            })
        })
    }

    fn get(&self, bucket: &str, key: &str, _timeout: Duration) -> Result<RemoteObject, StoreError> {
        self.with(|b| {
            let id = (bucket.to_string(), key.to_string());
            b.gets.push(id.clone());
            if b.get_failures.contains(&id) {
                return Err(StoreError::Rejected(format!("get {}/{} refused", bucket, key)));
            }
            let data = b
                .objects
                .get(bucket)
                .and_then(|o| o.get(key))
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })?;

            let content_length = data.len() as i64;
            let body = if b.short_bodies.contains(&id) {
                data[..data.len() / 2].to_vec()
            } else {
                data
            };
            Ok(RemoteObject {
                content_length,
                body: Box::new(Cursor::new(body)),
            })
        })
    }

    fn delete(&self, bucket: &str, key: &str, _timeout: Duration) -> Result<(), StoreError> {
        self.with(|b| {
            let id = (bucket.to_string(), key.to_string());
            b.deletes.push(id.clone());
            if b.delete_failures.contains(&id) {
                return Err(StoreError::Rejected(format!("delete {}/{} refused", bucket, key)));
            }
            if let Some(objects) = b.objects.get_mut(bucket) {
                objects.remove(key);
            }
            Ok(())
        })
    }
}

#[derive(Default)]
struct Documents {
    docs: Vec<Value>,
    failing_paths: HashSet<String>,
    extra_hits: HashMap<String, i64>,
    queries: Vec<TermQuery>,
}

/// Index documents held in memory. Matching uses the `path` and `bucket` fields.
#[derive(Default)]
pub struct MemoryIndex {
    inner: Mutex<Documents>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, document: Value) {
        self.with(|d| d.docs.push(document))
    }

    /// Searches for `path` fail.
    pub fn fail_on(&self, path: &str) {
        self.with(|d| {
            d.failing_paths.insert(path.to_string());
        })
    }

    /// Report `extra` more total hits for `path` than are returned.
    pub fn extra_hits(&self, path: &str, extra: i64) {
        self.with(|d| {
            d.extra_hits.insert(path.to_string(), extra);
        })
    }

    pub fn queries(&self) -> Vec<TermQuery> {
        self.with(|d| d.queries.clone())
    }

    fn with<T>(&self, f: impl FnOnce(&mut Documents) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl ArchiveIndex for MemoryIndex {
    fn search(
        &self,
        _index: &str,
        query: &TermQuery,
        _timeout: Duration,
    ) -> Result<SearchResponse, IndexError> {
        self.with(|d| {
            d.queries.push(query.clone());
            if d.failing_paths.contains(&query.path) {
                return Err(IndexError::Rejected(format!("search for {} refused", query.path)));
            }
            let hits: Vec<Value> = d
                .docs
                .iter()
                .filter(|doc| doc["path"].as_str() == Some(query.path.as_str()))
                .filter(|doc| {
                    let bucket = doc["bucket"].as_str().unwrap_or("");
                    !query.exclude_buckets.iter().any(|b| b == bucket)
                })
                .cloned()
                .collect();
            let extra = d.extra_hits.get(&query.path).copied().unwrap_or(0);
            Ok(SearchResponse {
                total_hits: hits.len() as i64 + extra,
                hits,
            })
        })
    }
}
