//! Error types for Holdpen records

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot open report {}: {source}", path.display())]
    OpenReport {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid URI '{uri}': {source}")]
    Uri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("URI '{0}' has no bucket")]
    MissingBucket(String),

    #[error("invalid escape sequence in '{0}'")]
    Escape(String),

    #[error("'{0}' does not decode to UTF-8")]
    Utf8(String),

    #[error("report row has {found} columns, need {expected}")]
    ShortRow { found: usize, expected: usize },

    #[error("invalid duplicate count '{0}'")]
    Count(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ModelError>;
