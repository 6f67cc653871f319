//! Single-threaded stream producers.

use crate::error::{PipelineError, Result, Severity, StageError};
use crate::stage::{Failure, StageHandle, StageMetrics, StageState, StateCell};
use crate::stream::{self, Disconnected, StreamSender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, Span};

/// Counting wrapper handed to a source's producer closure.
pub struct SourceSender<T> {
    tx: StreamSender<T>,
    metrics: Arc<StageMetrics>,
}

impl<T> SourceSender<T> {
    pub fn send(&self, record: T) -> std::result::Result<(), Disconnected> {
        self.tx.send(record)?;
        self.metrics.records_out.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Spawn the true producer of a stream.
///
/// When `produce` returns `Ok`, exactly one sentinel follows its records. A fatal failure
/// is signalled on the error stream and the stream is closed without a sentinel; the next
/// stage treats the disconnect as end of stream.
pub fn spawn_source<T, F>(
    name: impl Into<String>,
    capacity: usize,
    parent: &Span,
    produce: F,
) -> Result<StageHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(&SourceSender<T>) -> std::result::Result<(), Failure> + Send + 'static,
{
    let name = name.into();
    let span = tracing::info_span!(parent: parent, "source", stage = %name);
    let (tx, rx) = stream::bounded::<T>(capacity);
    let (err_tx, err_rx) = crossbeam_channel::bounded::<StageError>(1);
    let state = Arc::new(StateCell::new());
    let metrics = Arc::new(StageMetrics::default());

    let thread_state = Arc::clone(&state);
    let thread_metrics = Arc::clone(&metrics);
    let stage = name.clone();
    thread::Builder::new()
        .name(format!("{}-source", name))
        .spawn(move || {
            let _entered = span.enter();
            let sender = SourceSender {
                tx,
                metrics: thread_metrics,
            };
            let result = produce(&sender);
            let SourceSender { tx, metrics } = sender;

            match result {
                Ok(()) => {
                    thread_state.set(StageState::Terminated);
                    info!(records = metrics.records_out(), "source completed");
                    if tx.finish().is_err() {
                        debug!("downstream gone before end of stream");
                    }
                }
                Err(Failure::Fatal(source)) | Err(Failure::Degraded(source)) => {
                    thread_state.set(StageState::Aborting);
                    error!(error = %source, "source failed");
                    metrics.count_report(true);
                    let err = StageError::new(stage, Severity::Fatal, source);
                    if err_tx.send(err).is_err() {
                        error!("no listener for source error");
                    }
                    drop(tx);
                    thread_state.set(StageState::Terminated);
                }
                Err(Failure::Closed) => {
                    thread_state.set(StageState::Terminated);
                    debug!("downstream closed, source stopping");
                }
            }
            metrics.workers_exited.fetch_add(1, Ordering::SeqCst);
        })
        .map_err(|source| PipelineError::Spawn {
            stage: name.clone(),
            source,
        })?;

    Ok(StageHandle::new(name, rx, err_rx, state, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Envelope;

    #[test]
    fn completed_source_ends_with_one_sentinel() {
        let handle = spawn_source("numbers", 8, &Span::none(), |tx| {
            for i in 0..5u32 {
                tx.send(i)?;
            }
            Ok(())
        })
        .unwrap();

        let mut items = Vec::new();
        loop {
            let item = handle.output.recv().unwrap();
            let last = item.is_sentinel();
            items.push(item);
            if last {
                break;
            }
        }
        assert_eq!(items.len(), 6);
        assert_eq!(items[5], Envelope::Sentinel);
        assert!(handle.errors.recv().is_err());
        assert_eq!(handle.metrics().records_out(), 5);
    }

    #[test]
    fn failed_source_signals_error_without_sentinel() {
        let handle = spawn_source("broken", 8, &Span::none(), |tx| {
            tx.send(1u32)?;
            Err(Failure::fatal("listing failed"))
        })
        .unwrap();

        let err = handle.errors.recv().unwrap();
        assert_eq!(err.stage, "broken");
        assert!(err.is_fatal());

        assert_eq!(handle.output.recv(), Ok(Envelope::Record(1)));
        assert!(handle.output.recv().is_err());
    }
}
