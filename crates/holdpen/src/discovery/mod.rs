//! Archive discovery: which holding-pen files already exist elsewhere in the archive?
//!
//! ```text
//! bucket-scan ──► index-lookup (W) ──► proxy-locator (W) ──► report
//! ```
//!
//! Scan and lookup failures end the run. Proxy lookup failures are warnings and
//! only lose the affected file.

pub mod bucket_scan;
pub mod index_lookup;
pub mod proxy_locator;

use crate::config::HoldpenConfig;
use anyhow::Context;
use bucket_scan::BucketScan;
use holdpen_models::{LookupResult, ReportWriter};
use holdpen_pipeline::{spawn_stage, ErrorPolicy, StageConfig, Supervisor};
use holdpen_remote::{ArchiveIndex, BucketStore};
use index_lookup::IndexLookup;
use proxy_locator::ProxyLocator;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::{info, info_span};

const TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

/// Totals over every file that reached the report stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoverySummary {
    pub files: u64,
    pub total_bytes: i64,
    pub matched_files: u64,
    pub matched_bytes: i64,
    pub rows_written: u64,
    /// Non-fatal stage errors, including any the error channel could not hold
    pub warnings: usize,
}

impl DiscoverySummary {
    pub fn record(&mut self, result: &LookupResult) {
        self.files += 1;
        self.total_bytes += result.requested_file_size;
        if result.has_duplicates() {
            self.matched_files += 1;
            self.matched_bytes += result.requested_file_size;
        }
    }

    pub fn total_tib(&self) -> f64 {
        self.total_bytes as f64 / TIB
    }

    pub fn matched_tib(&self) -> f64 {
        self.matched_bytes as f64 / TIB
    }
}

impl fmt::Display for DiscoverySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} TiB in {} files, of which {:.1} TiB in {} files already archived",
            self.total_tib(),
            self.files,
            self.matched_tib(),
            self.matched_files
        )
    }
}

/// Run discovery over `config.target_bucket`, writing one report row per file.
///
/// The summary is logged even when the run fails part way.
pub fn run_discovery<W: Write>(
    store: Arc<dyn BucketStore>,
    index: Arc<dyn ArchiveIndex>,
    config: &HoldpenConfig,
    report: &mut ReportWriter<W>,
) -> anyhow::Result<DiscoverySummary> {
    config.validate()?;
    let run_span = info_span!("find_archived", bucket = %config.target_bucket);
    let exclusions = config.lookup_exclusions();
    info!(
        parent: &run_span,
        excluded = ?exclusions,
        index = %config.index_name,
        "starting discovery"
    );

    let mut supervisor = Supervisor::new();

    let scan = BucketScan {
        store: Arc::clone(&store),
        bucket: config.target_bucket.clone(),
        page_size: config.list_page_size,
        timeout: config.timeout(),
    }
    .spawn(config.channel_capacity, &run_span)?;
    supervisor.watch(&scan, ErrorPolicy::Abort);

    let lookup = spawn_stage(
        IndexLookup::new(index, &config.index_name, exclusions, config.timeout()),
        StageConfig::new(index_lookup::STAGE_NAME)
            .workers(config.lookup_threads)
            .capacity(config.channel_capacity)
            .parent(&run_span),
        scan.into_output(),
    )?;
    supervisor.watch(&lookup, ErrorPolicy::Abort);

    let proxies = spawn_stage(
        ProxyLocator::new(
            store,
            &config.proxy_bucket,
            config.proxy_page_size,
            config.timeout(),
        ),
        StageConfig::new(proxy_locator::STAGE_NAME)
            .workers(config.proxy_threads)
            .capacity(config.channel_capacity)
            .parent(&run_span),
        lookup.into_output(),
    )?;
    supervisor.watch(&proxies, ErrorPolicy::Warn);

    let mut summary = DiscoverySummary::default();
    let outcome = supervisor.run(proxies.into_output(), |result| {
        let buckets = result.duplicate_buckets().collect::<Vec<_>>().join(",");
        info!(
            parent: &run_span,
            file = %result.requested_file,
            count = result.count,
            buckets = %buckets,
            proxies = result.proxies.len(),
            "reconciled file"
        );
        summary.record(&result);
        if report.write(&result)? {
            summary.rows_written += 1;
        }
        Ok(())
    });

    report.flush().context("Failed to flush report")?;
    if let Ok(outcome) = &outcome {
        summary.warnings = outcome.warning_count();
    }
    info!(parent: &run_span, "All done, got a total of {}", summary);

    outcome.context("Discovery did not complete")?;
    Ok(summary)
}
