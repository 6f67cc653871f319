//! Download stage: materialise each entry under the download root before deletion.

use super::CleanupCounters;
use holdpen_models::keys::normalize_object_key;
use holdpen_models::FoundEntry;
use holdpen_pipeline::{Emitter, Failure, Transform};
use holdpen_remote::{BucketStore, StoreError};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{error, info, warn};

pub const STAGE_NAME: &str = "fetch";

const MEDIA_DIR: &str = "media";
const PROXY_DIR: &str = "proxy";
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{} already exists with {local} bytes but the remote object has {remote}", path.display())]
    Conflict { path: PathBuf, local: u64, remote: u64 },

    #[error("expected {expected} bytes from {key} but got {copied}")]
    SizeMismatch { key: String, expected: u64, copied: u64 },

    #[error("refusing to write key '{0}' outside the download root")]
    UnsafeKey(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded(u64),
    /// A local file of the same length was already there.
    AlreadyPresent(u64),
}

/// Where `key` lands locally: `<root>/media/<key>`, or `<root>/proxy/<key>` for proxies.
pub fn destination(root: &Path, key: &str, is_proxy: bool) -> Result<PathBuf, FetchError> {
    let relative = Path::new(key);
    let safe = !key.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(FetchError::UnsafeKey(key.to_string()));
    }
    let namespace = if is_proxy { PROXY_DIR } else { MEDIA_DIR };
    Ok(root.join(namespace).join(relative))
}

/// Download `bucket/key` to `dest`.
///
/// An existing file of the remote length is kept as is; one of any other length is a
/// conflict and is never overwritten. The body is written to a temporary file next to
/// `dest` and only moved into place once the byte count matches.
pub fn fetch_object(
    store: &dyn BucketStore,
    bucket: &str,
    key: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<FetchOutcome, FetchError> {
    let mut object = store.get(bucket, key, timeout)?;
    let expected = object.content_length.max(0) as u64;

    match fs::metadata(dest) {
        Ok(meta) if meta.len() == expected => {
            info!(path = %dest.display(), "local file already exists with the right size");
            return Ok(FetchOutcome::AlreadyPresent(expected));
        }
        Ok(meta) => {
            return Err(FetchError::Conflict {
                path: dest.to_path_buf(),
                local: meta.len(),
                remote: expected,
            })
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(FetchError::Io {
                path: dest.to_path_buf(),
                source,
            })
        }
    }

    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    create_dirs(dir)?;

    let io_err = |source: io::Error| FetchError::Io {
        path: dest.to_path_buf(),
        source,
    };
    let mut staged = NamedTempFile::new_in(dir).map_err(io_err)?;
    let copied = io::copy(&mut object.body, staged.as_file_mut()).map_err(io_err)?;
    if copied != expected {
        return Err(FetchError::SizeMismatch {
            key: key.to_string(),
            expected,
            copied,
        });
    }
    staged.as_file().sync_all().map_err(io_err)?;
    staged.persist_noclobber(dest).map_err(|err| io_err(err.error))?;
    Ok(FetchOutcome::Downloaded(copied))
}

fn create_dirs(dir: &Path) -> Result<(), FetchError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder.create(dir).map_err(|source| FetchError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Fetches every addressable entry and passes it on once it is safely on disk.
pub struct Fetcher {
    store: Arc<dyn BucketStore>,
    download_root: PathBuf,
    timeout: Duration,
    counters: Arc<CleanupCounters>,
}

impl Fetcher {
    pub fn new(
        store: Arc<dyn BucketStore>,
        download_root: impl Into<PathBuf>,
        timeout: Duration,
        counters: Arc<CleanupCounters>,
    ) -> Self {
        Self {
            store,
            download_root: download_root.into(),
            timeout,
            counters,
        }
    }
}

impl Transform for Fetcher {
    type Input = FoundEntry;
    type Output = FoundEntry;

    fn admit(&self, entry: &FoundEntry) -> bool {
        entry.is_addressable()
    }

    fn apply(&self, entry: FoundEntry, out: &mut Emitter<'_, FoundEntry>) -> Result<(), Failure> {
        let key = match normalize_object_key(&entry.path) {
            Ok(key) => key,
            Err(err) => {
                warn!(path = %entry.path, error = %err, "cannot decode path, skipping");
                self.counters.skip();
                return Ok(());
            }
        };
        let dest = match destination(&self.download_root, &key, entry.is_proxy) {
            Ok(dest) => dest,
            Err(err) => {
                warn!(bucket = %entry.bucket, key = %key, error = %err, "skipping entry");
                self.counters.skip();
                return Err(Failure::degraded(err));
            }
        };

        match fetch_object(self.store.as_ref(), &entry.bucket, &key, &dest, self.timeout) {
            Ok(FetchOutcome::Downloaded(bytes)) => {
                info!(key = %key, "fetched {:.1} MiB", bytes as f64 / MIB);
                self.counters.fetched();
            }
            Ok(FetchOutcome::AlreadyPresent(_)) => self.counters.already_present(),
            Err(err) => {
                error!(bucket = %entry.bucket, key = %key, error = %err, "cannot download");
                return Err(Failure::fatal(err));
            }
        }
        out.emit(entry)
    }
}
