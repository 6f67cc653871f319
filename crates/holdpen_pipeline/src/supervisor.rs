//! The selection loop that sits at the end of a pipeline.

use crate::error::{BoxError, ErrorReceiver, PipelineError, Result, StageError};
use crate::stage::{StageHandle, StageMetrics};
use crate::stream::{Envelope, StreamReceiver};
use crossbeam_channel::{RecvError, Select};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What the supervisor does with an error from a given stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// A fatal error ends the run.
    Abort,
    /// Every error is logged and counted; the run continues.
    Warn,
}

/// Summary of a run that reached its end of stream.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Records handed to the sink.
    pub records: u64,
    /// Errors that did not end the run, in arrival order.
    pub warnings: Vec<StageError>,
    /// Errors workers could not queue because the error channel was full. They were
    /// logged by the worker but never reached `warnings`.
    pub dropped: u64,
}

impl RunOutcome {
    /// Every non-fatal error, delivered or not.
    pub fn warning_count(&self) -> usize {
        self.warnings.len() + self.dropped as usize
    }
}

struct Watched {
    stage: String,
    policy: ErrorPolicy,
    rx: ErrorReceiver,
    open: bool,
    metrics: Option<Arc<StageMetrics>>,
}

enum Event<T> {
    Output(std::result::Result<Envelope<T>, RecvError>),
    Error(usize, std::result::Result<StageError, RecvError>),
}

/// Consumes the terminal stream of a pipeline while watching every stage's errors.
///
/// The first error that ends the run is returned; other stages are not stopped and
/// simply find their consumers gone.
#[derive(Default)]
pub struct Supervisor {
    watched: Vec<Watched>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch<T>(&mut self, handle: &StageHandle<T>, policy: ErrorPolicy) -> &mut Self {
        self.watch_errors(handle.name(), handle.errors.clone(), policy);
        if let Some(watched) = self.watched.last_mut() {
            watched.metrics = Some(handle.metrics());
        }
        self
    }

    pub fn watch_errors(
        &mut self,
        stage: impl Into<String>,
        rx: ErrorReceiver,
        policy: ErrorPolicy,
    ) -> &mut Self {
        self.watched.push(Watched {
            stage: stage.into(),
            policy,
            rx,
            open: true,
            metrics: None,
        });
        self
    }

    /// Drive the pipeline to completion, handing each terminal record to `sink`.
    pub fn run<T, F>(mut self, output: StreamReceiver<T>, mut sink: F) -> Result<RunOutcome>
    where
        F: FnMut(T) -> std::result::Result<(), BoxError>,
    {
        let mut outcome = RunOutcome::default();

        loop {
            let event = {
                let mut sel = Select::new();
                let out_idx = sel.recv(output.channel());
                let mut slots = Vec::with_capacity(self.watched.len());
                for (i, watched) in self.watched.iter().enumerate() {
                    if watched.open {
                        slots.push((sel.recv(&watched.rx), i));
                    }
                }

                let oper = sel.select();
                let idx = oper.index();
                if idx == out_idx {
                    Event::Output(oper.recv(output.channel()))
                } else {
                    let watched_idx = slots
                        .iter()
                        .find(|(slot, _)| *slot == idx)
                        .map(|(_, i)| *i)
                        .unwrap_or_default();
                    Event::Error(watched_idx, oper.recv(&self.watched[watched_idx].rx))
                }
            };

            match event {
                Event::Output(Ok(Envelope::Record(record))) => {
                    outcome.records += 1;
                    sink(record).map_err(PipelineError::Sink)?;
                }
                Event::Output(Ok(Envelope::Sentinel)) => {
                    self.drain_pending(&mut outcome)?;
                    outcome.dropped = self.dropped_errors();
                    info!(
                        records = outcome.records,
                        warnings = outcome.warnings.len(),
                        dropped = outcome.dropped,
                        "pipeline reached end of stream"
                    );
                    return Ok(outcome);
                }
                Event::Output(Err(_)) => {
                    self.drain_pending(&mut outcome)?;
                    error!("terminal stream closed without end-of-stream marker");
                    return Err(PipelineError::Truncated);
                }
                Event::Error(idx, Ok(err)) => {
                    let policy = self.watched[idx].policy;
                    handle_error(policy, err, &mut outcome)?;
                }
                Event::Error(idx, Err(_)) => {
                    self.watched[idx].open = false;
                }
            }
        }
    }

    fn drain_pending(&mut self, outcome: &mut RunOutcome) -> Result<()> {
        for watched in self.watched.iter_mut().filter(|w| w.open) {
            while let Ok(err) = watched.rx.try_recv() {
                handle_error(watched.policy, err, outcome)?;
            }
            watched.open = false;
        }
        Ok(())
    }

    fn dropped_errors(&self) -> u64 {
        self.watched
            .iter()
            .filter_map(|w| w.metrics.as_ref())
            .map(|m| m.errors_dropped())
            .sum()
    }

    /// Names of the stages being watched.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.watched.iter().map(|w| w.stage.as_str())
    }
}

fn handle_error(policy: ErrorPolicy, err: StageError, outcome: &mut RunOutcome) -> Result<()> {
    if policy == ErrorPolicy::Abort && err.is_fatal() {
        error!(stage = %err.stage, error = %err.source, "stage failed, stopping run");
        return Err(PipelineError::Stage(err));
    }
    warn!(stage = %err.stage, severity = %err.severity, error = %err.source, "stage reported an error");
    outcome.warnings.push(err);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;
    use crate::stream::bounded;

    #[test]
    fn run_hands_records_to_sink_until_sentinel() {
        let (tx, rx) = bounded::<u32>(8);
        for i in 1..=3 {
            tx.send(i).unwrap();
        }
        tx.finish().unwrap();

        let mut seen = Vec::new();
        let outcome = Supervisor::new()
            .run(rx, |r| {
                seen.push(r);
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome.records, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn first_fatal_error_ends_run() {
        let (_tx, rx) = bounded::<u32>(8);
        let (err_tx, err_rx) = crossbeam_channel::bounded(1);
        err_tx
            .send(StageError::new("lookup", Severity::Fatal, "index down"))
            .unwrap();

        let mut sup = Supervisor::new();
        sup.watch_errors("lookup", err_rx, ErrorPolicy::Abort);
        let err = sup.run(rx, |_| Ok(())).unwrap_err();
        match err {
            PipelineError::Stage(stage_err) => assert_eq!(stage_err.stage, "lookup"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn warn_policy_keeps_running() {
        let (tx, rx) = bounded::<u32>(8);
        let (err_tx, err_rx) = crossbeam_channel::bounded(1);
        err_tx
            .send(StageError::new("proxy", Severity::Degraded, "list failed"))
            .unwrap();
        drop(err_tx);
        tx.send(7).unwrap();
        tx.finish().unwrap();

        let mut sup = Supervisor::new();
        sup.watch_errors("proxy", err_rx, ErrorPolicy::Warn);
        let outcome = sup.run(rx, |_| Ok(())).unwrap();
        assert_eq!(outcome.records, 1);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn fatal_error_racing_sentinel_is_still_reported() {
        let (tx, rx) = bounded::<u32>(8);
        tx.finish().unwrap();
        let (err_tx, err_rx) = crossbeam_channel::bounded(1);
        err_tx
            .send(StageError::new("fetch", Severity::Fatal, "size mismatch"))
            .unwrap();

        let mut sup = Supervisor::new();
        sup.watch_errors("fetch", err_rx, ErrorPolicy::Abort);
        assert!(sup.run(rx, |_| Ok(())).is_err());
    }

    #[test]
    fn sink_failure_ends_run() {
        let (tx, rx) = bounded::<u32>(8);
        tx.send(1).unwrap();
        tx.finish().unwrap();

        let err = Supervisor::new()
            .run(rx, |_| Err("disk full".into()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Sink(_)));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let (tx, rx) = bounded::<u32>(8);
        drop(tx);
        let err = Supervisor::new().run(rx, |_| Ok(())).unwrap_err();
        assert!(matches!(err, PipelineError::Truncated));
    }
}
