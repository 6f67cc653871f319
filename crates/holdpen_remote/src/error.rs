//! Error types for remote collaborators

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("{operation} on bucket '{bucket}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        bucket: String,
        timeout: Duration,
    },

    #[error("object '{key}' not found in bucket '{bucket}'")]
    NotFound { bucket: String, key: String },

    #[error("'{key}' is not a usable object key: {message}")]
    InvalidKey { key: String, message: String },

    #[error("cannot configure bucket '{bucket}': {message}")]
    Configure { bucket: String, message: String },

    #[error("{0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("index returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("search timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid index URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed search response: {0}")]
    Response(String),

    #[error("{0}")]
    Rejected(String),
}

impl StoreError {
    /// True when the object was not there, as opposed to the store failing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::ObjectStore(object_store::Error::NotFound { .. })
        )
    }
}
