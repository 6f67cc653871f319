//! Error types for the pipeline engine

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fmt;
use std::io;
use thiserror::Error;

/// Boxed error carried from a transform to the supervisor.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How bad a reported stage error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The reporting worker (or source) has exited.
    Fatal,
    /// One record was lost; the stage keeps consuming.
    Degraded,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Fatal => write!(f, "fatal"),
            Severity::Degraded => write!(f, "degraded"),
        }
    }
}

/// The error signal travelling on a stage's error stream.
#[derive(Debug, Error)]
#[error("{severity} error in stage '{stage}': {source}")]
pub struct StageError {
    pub stage: String,
    pub severity: Severity,
    #[source]
    pub source: BoxError,
}

impl StageError {
    pub fn new(stage: impl Into<String>, severity: Severity, source: impl Into<BoxError>) -> Self {
        Self {
            stage: stage.into(),
            severity,
            source: source.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// Receiving half of a stage's error stream.
pub type ErrorReceiver = Receiver<StageError>;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to spawn thread for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("terminal stream closed before its end-of-stream marker")]
    Truncated,

    #[error("sink rejected record: {0}")]
    Sink(#[source] BoxError),

    #[error("invalid stage configuration for '{stage}': {message}")]
    Config { stage: String, message: String },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Report an error without ever blocking the caller.
///
/// The channel holds one signal. When it is already occupied (or nobody listens any
/// more) the error is logged and dropped; the first signal stays authoritative.
/// Returns `true` when the signal was queued.
pub(crate) fn report_nonblocking(tx: &Sender<StageError>, err: StageError) -> bool {
    match tx.try_send(err) {
        Ok(()) => true,
        Err(TrySendError::Full(err)) => {
            tracing::error!(
                stage = %err.stage,
                severity = %err.severity,
                error = %err.source,
                "error slot already occupied, dropping report"
            );
            false
        }
        Err(TrySendError::Disconnected(err)) => {
            tracing::error!(
                stage = %err.stage,
                severity = %err.severity,
                error = %err.source,
                "no listener for error report, dropping"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_report_is_dropped_not_blocked() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        assert!(report_nonblocking(
            &tx,
            StageError::new("lookup", Severity::Fatal, "first")
        ));
        assert!(!report_nonblocking(
            &tx,
            StageError::new("lookup", Severity::Fatal, "second")
        ));

        let got = rx.try_recv().unwrap();
        assert_eq!(got.source.to_string(), "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn report_without_listener_returns_false() {
        let (tx, rx) = crossbeam_channel::bounded::<StageError>(1);
        drop(rx);
        assert!(!report_nonblocking(
            &tx,
            StageError::new("delete", Severity::Degraded, "gone")
        ));
    }

    #[test]
    fn stage_error_display_names_stage_and_severity() {
        let err = StageError::new("fetch", Severity::Fatal, "disk full");
        assert_eq!(err.to_string(), "fatal error in stage 'fetch': disk full");
        assert!(err.is_fatal());
    }
}
