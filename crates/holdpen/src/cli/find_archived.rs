//! `holdpen find-archived`: write a report of holding-pen files already in the archive.

use super::set;
use anyhow::Context;
use holdpen::{run_discovery, HoldpenConfig};
use holdpen_models::ReportWriter;
use holdpen_remote::{ArchiveIndex, BucketStore, ElasticsearchIndex, S3BucketStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

#[derive(Debug, Default)]
pub struct FindArchivedArgs {
    pub output: PathBuf,
    pub target: Option<String>,
    pub proxy: Option<String>,
    pub elastic: Option<String>,
    pub index: Option<String>,
    pub exclude: Vec<String>,
    pub threads: Option<usize>,
    pub proxy_threads: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub only_with_duplicates: bool,
}

impl FindArchivedArgs {
    pub fn apply(&self, config: &mut HoldpenConfig) {
        set(&mut config.target_bucket, &self.target);
        set(&mut config.proxy_bucket, &self.proxy);
        set(&mut config.elastic_url, &self.elastic);
        set(&mut config.index_name, &self.index);
        set(&mut config.lookup_threads, &self.threads);
        set(&mut config.proxy_threads, &self.proxy_threads);
        set(&mut config.timeout_secs, &self.timeout_secs);
        if !self.exclude.is_empty() {
            config.exclude_buckets = self.exclude.clone();
        }
    }
}

pub fn run(args: FindArchivedArgs, mut config: HoldpenConfig, handle: Handle) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let index = ElasticsearchIndex::new(&config.elastic_url, handle.clone())
        .with_context(|| format!("Invalid index URL {}", config.elastic_url))?;
    let index: Arc<dyn ArchiveIndex> = Arc::new(index);
    let store: Arc<dyn BucketStore> = Arc::new(S3BucketStore::new(handle));

    let mut report = ReportWriter::create(&args.output, args.only_with_duplicates)
        .with_context(|| format!("Cannot create report {}", args.output.display()))?;

    let summary = run_discovery(store, index, &config, &mut report)?;
    info!(
        report = %args.output.display(),
        rows = summary.rows_written,
        "report written"
    );
    println!("{}", summary);
    Ok(())
}
