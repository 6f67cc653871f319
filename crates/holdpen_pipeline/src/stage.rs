//! Stages: a broadcast interceptor in front of a fixed-size worker pool.
//!
//! Lifecycle of one stage:
//!
//! - **Running**: the interceptor forwards upstream records to the shared worker input.
//! - **Draining**: the upstream sentinel arrived; one sentinel per worker is queued and the
//!   interceptor joins every worker.
//! - **Aborting**: a worker failed fatally before the upstream sentinel; remaining workers
//!   are still signalled and joined so none of them leaks.
//! - **Terminated**: workers are gone, any fatal error has been forwarded, and the single
//!   downstream sentinel has been emitted.

use crate::error::{report_nonblocking, BoxError, ErrorReceiver, PipelineError, Result, Severity, StageError};
use crate::stream::{self, Disconnected, Envelope, StreamReceiver, StreamSender, DEFAULT_CAPACITY};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn, Span};

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 4;

/// Outcome of a transform that did not succeed.
#[derive(Debug, Error)]
pub enum Failure {
    /// Unrecoverable: the worker reports once and exits, the stage aborts.
    #[error("fatal: {0}")]
    Fatal(BoxError),
    /// One record is lost; reported on the error stream, the worker carries on.
    #[error("degraded: {0}")]
    Degraded(BoxError),
    /// The downstream consumer is gone.
    #[error("downstream closed")]
    Closed,
}

impl Failure {
    pub fn fatal(err: impl Into<BoxError>) -> Self {
        Failure::Fatal(err.into())
    }

    pub fn degraded(err: impl Into<BoxError>) -> Self {
        Failure::Degraded(err.into())
    }
}

impl From<Disconnected> for Failure {
    fn from(_: Disconnected) -> Self {
        Failure::Closed
    }
}

/// Per-record work done by a stage's workers.
///
/// Workers share one `Transform` instance; processing order across workers is not
/// guaranteed.
pub trait Transform: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Turn one input into zero or more outputs.
    fn apply(&self, input: Self::Input, out: &mut Emitter<'_, Self::Output>) -> std::result::Result<(), Failure>;

    /// Interceptor-side filter; rejected records never reach a worker.
    fn admit(&self, _input: &Self::Input) -> bool {
        true
    }
}

enum Sink<'a, T> {
    Stream(&'a StreamSender<T>),
    Buffer(&'a mut Vec<T>),
}

/// Where a transform writes its outputs.
pub struct Emitter<'a, T> {
    sink: Sink<'a, T>,
    emitted: u64,
}

impl<'a, T> Emitter<'a, T> {
    pub fn new(tx: &'a StreamSender<T>) -> Self {
        Self {
            sink: Sink::Stream(tx),
            emitted: 0,
        }
    }

    /// Emitter that collects into a vector instead of a stream.
    pub fn buffered(buf: &'a mut Vec<T>) -> Self {
        Self {
            sink: Sink::Buffer(buf),
            emitted: 0,
        }
    }

    pub fn emit(&mut self, record: T) -> std::result::Result<(), Failure> {
        match &mut self.sink {
            Sink::Stream(tx) => tx.send(record)?,
            Sink::Buffer(buf) => buf.push(record),
        }
        self.emitted += 1;
        Ok(())
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// Run a transform on one input outside of any stage and collect what it emits.
pub fn collect_outputs<T: Transform>(
    transform: &T,
    input: T::Input,
) -> (Vec<T::Output>, std::result::Result<(), Failure>) {
    let mut buf = Vec::new();
    let result = {
        let mut emitter = Emitter::buffered(&mut buf);
        transform.apply(input, &mut emitter)
    };
    (buf, result)
}

/// Stage configuration
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub name: String,
    pub workers: usize,
    pub capacity: usize,
    /// Span the stage's own span is parented on.
    pub parent: Span,
}

impl StageConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: DEFAULT_WORKERS,
            capacity: DEFAULT_CAPACITY,
            parent: Span::current(),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn parent(mut self, span: &Span) -> Self {
        self.parent = span.clone();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::Config {
                stage: self.name.clone(),
                message: "worker count must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Where a stage is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Running,
    Draining,
    Aborting,
    Terminated,
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub(crate) fn set(&self, state: StageState) {
        let raw = match state {
            StageState::Running => 0,
            StageState::Draining => 1,
            StageState::Aborting => 2,
            StageState::Terminated => 3,
        };
        self.0.store(raw, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> StageState {
        match self.0.load(Ordering::SeqCst) {
            0 => StageState::Running,
            1 => StageState::Draining,
            2 => StageState::Aborting,
            _ => StageState::Terminated,
        }
    }
}

/// Counters maintained by a running stage.
#[derive(Debug, Default)]
pub struct StageMetrics {
    pub(crate) records_in: AtomicU64,
    pub(crate) records_out: AtomicU64,
    pub(crate) records_filtered: AtomicU64,
    pub(crate) sentinels_broadcast: AtomicU64,
    pub(crate) workers_exited: AtomicU64,
    pub(crate) errors_reported: AtomicU64,
    pub(crate) errors_dropped: AtomicU64,
}

impl StageMetrics {
    /// Records handed to a worker (or produced by a source).
    pub fn records_in(&self) -> u64 {
        self.records_in.load(Ordering::SeqCst)
    }

    pub fn records_out(&self) -> u64 {
        self.records_out.load(Ordering::SeqCst)
    }

    /// Records rejected by [`Transform::admit`].
    pub fn records_filtered(&self) -> u64 {
        self.records_filtered.load(Ordering::SeqCst)
    }

    pub fn sentinels_broadcast(&self) -> u64 {
        self.sentinels_broadcast.load(Ordering::SeqCst)
    }

    pub fn workers_exited(&self) -> u64 {
        self.workers_exited.load(Ordering::SeqCst)
    }

    pub fn errors_reported(&self) -> u64 {
        self.errors_reported.load(Ordering::SeqCst)
    }

    pub fn errors_dropped(&self) -> u64 {
        self.errors_dropped.load(Ordering::SeqCst)
    }

    pub(crate) fn count_report(&self, queued: bool) {
        if queued {
            self.errors_reported.fetch_add(1, Ordering::SeqCst);
        } else {
            self.errors_dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Handle to a spawned stage (or source).
pub struct StageHandle<T> {
    name: String,
    pub output: StreamReceiver<T>,
    pub errors: ErrorReceiver,
    state: Arc<StateCell>,
    metrics: Arc<StageMetrics>,
}

impl<T> StageHandle<T> {
    pub(crate) fn new(
        name: String,
        output: StreamReceiver<T>,
        errors: ErrorReceiver,
        state: Arc<StateCell>,
        metrics: Arc<StageMetrics>,
    ) -> Self {
        Self {
            name,
            output,
            errors,
            state,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StageState {
        self.state.get()
    }

    pub fn metrics(&self) -> Arc<StageMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Give up the handle, keeping only the output stream for the next stage.
    ///
    /// Holding a spare receiver would keep the stream open after its real consumer
    /// has gone, so wiring code hands the output on with this.
    pub fn into_output(self) -> StreamReceiver<T> {
        self.output
    }
}

/// Spawn a stage consuming `upstream` and return its output and error streams.
pub fn spawn_stage<T: Transform>(
    transform: T,
    config: StageConfig,
    upstream: StreamReceiver<T::Input>,
) -> Result<StageHandle<T::Output>> {
    config.validate()?;

    let span = tracing::info_span!(
        parent: &config.parent,
        "stage",
        stage = %config.name,
        workers = config.workers
    );
    let transform = Arc::new(transform);
    let state = Arc::new(StateCell::new());
    let metrics = Arc::new(StageMetrics::default());

    let (out_tx, out_rx) = stream::bounded::<T::Output>(config.capacity);
    let (work_tx, work_rx) = stream::bounded::<T::Input>(config.capacity);
    let (err_tx, err_rx) = crossbeam_channel::bounded::<StageError>(1);
    let (fatal_tx, fatal_rx) = crossbeam_channel::bounded::<StageError>(1);

    let mut workers = Vec::with_capacity(config.workers);
    for idx in 0..config.workers {
        let worker = Worker {
            idx,
            stage: config.name.clone(),
            transform: Arc::clone(&transform),
            input: work_rx.clone(),
            output: out_tx.clone(),
            degraded: err_tx.clone(),
            fatal: fatal_tx.clone(),
            metrics: Arc::clone(&metrics),
        };
        let worker_span = span.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-{}", config.name, idx))
            .spawn(move || {
                let _entered = worker_span.enter();
                worker.run();
            })
            .map_err(|source| PipelineError::Spawn {
                stage: config.name.clone(),
                source,
            })?;
        workers.push(handle);
    }

    // Workers own the remaining receivers/senders; disconnects now follow worker exits.
    drop(work_rx);
    drop(fatal_tx);

    let interceptor = Interceptor {
        stage: config.name.clone(),
        transform,
        upstream,
        work_tx,
        fatal_rx,
        workers,
        output: out_tx,
        errors: err_tx,
        state: Arc::clone(&state),
        metrics: Arc::clone(&metrics),
    };
    let interceptor_span = span;
    thread::Builder::new()
        .name(format!("{}-intercept", config.name))
        .spawn(move || {
            let _entered = interceptor_span.enter();
            interceptor.run();
        })
        .map_err(|source| PipelineError::Spawn {
            stage: config.name.clone(),
            source,
        })?;

    Ok(StageHandle::new(config.name, out_rx, err_rx, state, metrics))
}

struct Worker<T: Transform> {
    idx: usize,
    stage: String,
    transform: Arc<T>,
    input: StreamReceiver<T::Input>,
    output: StreamSender<T::Output>,
    degraded: Sender<StageError>,
    fatal: Sender<StageError>,
    metrics: Arc<StageMetrics>,
}

/// Counts the worker as exited however it leaves, including by panic.
struct ExitGuard<'a>(&'a StageMetrics);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.workers_exited.fetch_add(1, Ordering::SeqCst);
    }
}

impl<T: Transform> Worker<T> {
    fn run(self) {
        let _exit = ExitGuard(&self.metrics);
        loop {
            let record = match self.input.recv() {
                Ok(Envelope::Record(record)) => record,
                Ok(Envelope::Sentinel) => {
                    debug!(worker = self.idx, "worker received end of stream, exiting");
                    return;
                }
                Err(Disconnected) => {
                    debug!(worker = self.idx, "worker input closed, exiting");
                    return;
                }
            };
            self.metrics.records_in.fetch_add(1, Ordering::SeqCst);

            let mut emitter = Emitter::new(&self.output);
            let result = self.transform.apply(record, &mut emitter);
            self.metrics
                .records_out
                .fetch_add(emitter.emitted(), Ordering::SeqCst);

            match result {
                Ok(()) => {}
                Err(Failure::Degraded(source)) => {
                    warn!(worker = self.idx, error = %source, "record failed, continuing");
                    let queued = report_nonblocking(
                        &self.degraded,
                        StageError::new(&self.stage, Severity::Degraded, source),
                    );
                    self.metrics.count_report(queued);
                }
                Err(Failure::Fatal(source)) => {
                    error!(worker = self.idx, error = %source, "worker failed, exiting");
                    let queued = report_nonblocking(
                        &self.fatal,
                        StageError::new(&self.stage, Severity::Fatal, source),
                    );
                    if !queued {
                        self.metrics.count_report(false);
                    }
                    return;
                }
                Err(Failure::Closed) => {
                    debug!(worker = self.idx, "downstream closed, exiting");
                    return;
                }
            }
        }
    }
}

enum Forwarded {
    EndOfStream,
    Abort(StageError),
    WorkersGone,
}

struct Interceptor<T: Transform> {
    stage: String,
    transform: Arc<T>,
    upstream: StreamReceiver<T::Input>,
    work_tx: StreamSender<T::Input>,
    fatal_rx: Receiver<StageError>,
    workers: Vec<JoinHandle<()>>,
    output: StreamSender<T::Output>,
    errors: Sender<StageError>,
    state: Arc<StateCell>,
    metrics: Arc<StageMetrics>,
}

impl<T: Transform> Interceptor<T> {
    fn run(mut self) {
        let forwarded = self.forward();
        let mut fatal = match forwarded {
            Forwarded::EndOfStream => {
                self.state.set(StageState::Draining);
                debug!("end of stream, signalling workers");
                None
            }
            Forwarded::Abort(err) => {
                self.state.set(StageState::Aborting);
                warn!(error = %err.source, "worker failed, terminating remaining workers");
                Some(err)
            }
            Forwarded::WorkersGone => {
                self.state.set(StageState::Aborting);
                warn!("all workers exited before end of stream");
                None
            }
        };

        self.broadcast();
        self.join_workers();

        if fatal.is_none() {
            // a worker may have failed while draining
            fatal = self.fatal_rx.try_recv().ok();
        }
        if let Some(err) = fatal {
            self.metrics.count_report(true);
            if self.errors.send(err).is_err() {
                error!("no listener for stage error");
            }
        }

        self.state.set(StageState::Terminated);
        info!(
            records_in = self.metrics.records_in(),
            records_out = self.metrics.records_out(),
            "stage terminated"
        );
        if self.output.finish().is_err() {
            debug!("downstream gone before end of stream");
        }
    }

    fn forward(&self) -> Forwarded {
        let upstream = self.upstream.channel();
        loop {
            crossbeam_channel::select! {
                recv(upstream) -> msg => match msg {
                    Ok(Envelope::Record(record)) => {
                        if !self.transform.admit(&record) {
                            self.metrics.records_filtered.fetch_add(1, Ordering::SeqCst);
                        } else if self.work_tx.send(record).is_err() {
                            return self.workers_gone();
                        }
                    }
                    Ok(Envelope::Sentinel) => return Forwarded::EndOfStream,
                    Err(_) => {
                        warn!("upstream closed without end-of-stream marker, treating as end of stream");
                        return Forwarded::EndOfStream;
                    }
                },
                recv(self.fatal_rx) -> msg => match msg {
                    Ok(err) => return Forwarded::Abort(err),
                    Err(_) => return self.workers_gone(),
                },
            }
        }
    }

    fn workers_gone(&self) -> Forwarded {
        match self.fatal_rx.try_recv() {
            Ok(err) => Forwarded::Abort(err),
            Err(_) => Forwarded::WorkersGone,
        }
    }

    fn broadcast(&self) {
        for _ in 0..self.workers.len() {
            if self.work_tx.send_sentinel().is_err() {
                // every remaining worker has already left
                break;
            }
            self.metrics.sentinels_broadcast.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!(stage = %self.stage, "worker thread panicked");
            }
        }
        debug!("all workers exited");
    }
}
