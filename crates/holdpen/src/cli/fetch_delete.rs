//! `holdpen fetch-delete`: download and remove the files listed in a report.

use super::set;
use anyhow::Context;
use holdpen::{run_cleanup, CleanupOptions, HoldpenConfig};
use holdpen_models::ReportReader;
use holdpen_remote::{BucketStore, S3BucketStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Debug, Default)]
pub struct FetchDeleteArgs {
    pub input: PathBuf,
    pub bucket: Option<String>,
    pub fetch_threads: Option<usize>,
    pub delete_threads: Option<usize>,
    pub download_root: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub skip_download: bool,
    pub really_delete: bool,
}

impl FetchDeleteArgs {
    pub fn apply(&self, config: &mut HoldpenConfig) {
        set(&mut config.target_bucket, &self.bucket);
        set(&mut config.fetch_threads, &self.fetch_threads);
        set(&mut config.delete_threads, &self.delete_threads);
        set(&mut config.download_root, &self.download_root);
        set(&mut config.timeout_secs, &self.timeout_secs);
    }

    pub fn options(&self) -> CleanupOptions {
        CleanupOptions {
            skip_download: self.skip_download,
            really_delete: self.really_delete,
        }
    }
}

pub fn run(args: FetchDeleteArgs, mut config: HoldpenConfig, handle: Handle) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let reader = ReportReader::open(&args.input)
        .with_context(|| format!("Cannot open report {}", args.input.display()))?;
    let store: Arc<dyn BucketStore> = Arc::new(S3BucketStore::new(handle));

    let summary = run_cleanup(store, reader, &config, args.options())?;
    println!("{}", summary);
    Ok(())
}
