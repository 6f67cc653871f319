//! Holdpen Pipeline - bounded-stream worker-pool engine
//!
//! Every Holdpen tool is a chain of stages connected by bounded streams. A stage is a
//! broadcast interceptor in front of a fixed-size worker pool:
//!
//! ```text
//!              ┌──────────────┐      ┌──────────┐
//!  upstream ──▶│ interceptor  │─────▶│ worker 0 │──┐
//!   (1 EOS)    │ (EOS × W,    │  ├──▶│ worker 1 │──┼──▶ output (1 EOS)
//!              │  join, EOS)  │  └──▶│ worker N │──┘
//!              └──────────────┘      └──────────┘
//!                     ▲                    │ fatal
//!                     └────── internal ────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Envelope**: a stream item, either a record or the end-of-stream sentinel
//! - **Stream**: a bounded FIFO; `send` blocks when full, `recv` blocks when empty
//! - **Stage**: interceptor + worker pool running one [`Transform`]
//! - **Source**: a single producer thread that feeds the first stage
//! - **Supervisor**: the selection loop that consumes the terminal stream and watches errors
//!
//! There is no pipeline-wide cancellation. A failing stage drains its own workers and
//! reports; other stages keep running until they see their own end of stream.

pub mod error;
pub mod source;
pub mod stage;
pub mod stream;
pub mod supervisor;

// Re-exports for convenience
pub use error::{BoxError, ErrorReceiver, PipelineError, Result, Severity, StageError};
pub use source::{spawn_source, SourceSender};
pub use stage::{
    collect_outputs, spawn_stage, Emitter, Failure, StageConfig, StageHandle, StageMetrics, StageState, Transform,
    DEFAULT_WORKERS,
};
pub use stream::{bounded, Disconnected, Envelope, StreamReceiver, StreamSender, DEFAULT_CAPACITY};
pub use supervisor::{ErrorPolicy, RunOutcome, Supervisor};
