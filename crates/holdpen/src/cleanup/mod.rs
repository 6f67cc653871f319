//! Fetch-and-delete: act on a discovery report.
//!
//! ```text
//! report ──► entry-fanout (1) ──► fetch (W, optional) ──► delete (W)
//! ```
//!
//! Every stage aborts the run on a fatal error. Nothing is removed from a bucket
//! unless `really_delete` is set.

pub mod delete;
pub mod fanout;
pub mod fetch;

use crate::config::HoldpenConfig;
use anyhow::Context;
use delete::Deleter;
use fanout::EntryFanout;
use fetch::Fetcher;
use holdpen_models::{LookupResult, ReportReader};
use holdpen_pipeline::{spawn_source, spawn_stage, ErrorPolicy, Failure, StageConfig, Supervisor};
use holdpen_remote::BucketStore;
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span};

pub const REPORT_SOURCE: &str = "report";

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupOptions {
    pub skip_download: bool,
    pub really_delete: bool,
}

/// Counters shared by the cleanup stages.
#[derive(Debug, Default)]
pub struct CleanupCounters {
    rows: AtomicU64,
    fetched: AtomicU64,
    already_present: AtomicU64,
    deleted: AtomicU64,
    dry_run: AtomicU64,
    skipped: AtomicU64,
}

impl CleanupCounters {
    pub fn row(&self) {
        self.rows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn already_present(&self) {
        self.already_present.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dry_run(&self) {
        self.dry_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CleanupSummary {
        CleanupSummary {
            rows: self.rows.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            dry_run: self.dry_run.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            warnings: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Report rows handed to the pipeline
    pub rows: u64,
    pub fetched: u64,
    pub already_present: u64,
    pub deleted: u64,
    /// Deletions only logged because the run was dry
    pub dry_run: u64,
    pub skipped: u64,
    pub warnings: usize,
}

impl fmt::Display for CleanupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} report rows: {} fetched, {} already present, {} deleted, {} dry-run, {} skipped",
            self.rows, self.fetched, self.already_present, self.deleted, self.dry_run, self.skipped
        )
    }
}

/// Run fetch-and-delete over every row of `reader`.
///
/// Rows go to `config.target_bucket` and their proxies; downloads land under
/// `config.download_root`. Counts are logged even when the run fails part way.
pub fn run_cleanup<R>(
    store: Arc<dyn BucketStore>,
    reader: ReportReader<R>,
    config: &HoldpenConfig,
    options: CleanupOptions,
) -> anyhow::Result<CleanupSummary>
where
    R: Read + Send + 'static,
{
    config.validate()?;
    let run_span = info_span!(
        "fetch_delete",
        bucket = %config.target_bucket,
        really_delete = options.really_delete
    );
    if !options.really_delete {
        info!(parent: &run_span, "dry run, nothing will be deleted");
    }
    if options.skip_download {
        info!(parent: &run_span, "downloads are skipped");
    }

    let counters = Arc::new(CleanupCounters::default());
    let mut supervisor = Supervisor::new();

    let source_counters = Arc::clone(&counters);
    let report = spawn_source(
        REPORT_SOURCE,
        config.channel_capacity,
        &run_span,
        move |tx| {
            for row in reader {
                let result: LookupResult = row.map_err(|err| {
                    error!(error = %err, "cannot read report");
                    Failure::fatal(err)
                })?;
                source_counters.row();
                tx.send(result)?;
            }
            Ok(())
        },
    )?;
    supervisor.watch(&report, ErrorPolicy::Abort);

    // Ordering within a row matters here: the root file precedes its proxies.
    let fanout = spawn_stage(
        EntryFanout::new(&config.target_bucket),
        StageConfig::new(fanout::STAGE_NAME)
            .workers(1)
            .capacity(config.channel_capacity)
            .parent(&run_span),
        report.into_output(),
    )?;
    supervisor.watch(&fanout, ErrorPolicy::Abort);

    let to_delete = if options.skip_download {
        fanout.into_output()
    } else {
        let fetch = spawn_stage(
            Fetcher::new(
                Arc::clone(&store),
                &config.download_root,
                config.timeout(),
                Arc::clone(&counters),
            ),
            StageConfig::new(fetch::STAGE_NAME)
                .workers(config.fetch_threads)
                .capacity(config.channel_capacity)
                .parent(&run_span),
            fanout.into_output(),
        )?;
        supervisor.watch(&fetch, ErrorPolicy::Abort);
        fetch.into_output()
    };

    let delete = spawn_stage(
        Deleter::new(
            store,
            options.really_delete,
            config.delete_timeout(),
            Arc::clone(&counters),
        ),
        StageConfig::new(delete::STAGE_NAME)
            .workers(config.delete_threads)
            .capacity(config.channel_capacity)
            .parent(&run_span),
        to_delete,
    )?;
    supervisor.watch(&delete, ErrorPolicy::Abort);

    let outcome = supervisor.run(delete.into_output(), |()| Ok(()));

    let mut summary = counters.snapshot();
    if let Ok(outcome) = &outcome {
        summary.warnings = outcome.warning_count();
    }
    info!(parent: &run_span, "All done: {}", summary);

    outcome.context("Fetch and delete did not complete")?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_every_counter() {
        let counters = CleanupCounters::default();
        counters.row();
        counters.fetched();
        counters.fetched();
        counters.already_present();
        counters.deleted();
        counters.dry_run();
        counters.skip();

        let summary = counters.snapshot();
        assert_eq!(summary.rows, 1);
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.already_present, 1);
        assert_eq!(
            summary.to_string(),
            "1 report rows: 2 fetched, 1 already present, 1 deleted, 1 dry-run, 1 skipped"
        );
    }
}
