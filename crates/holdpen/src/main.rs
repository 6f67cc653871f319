//! Holdpen launcher
//!
//! - `find-archived`: report which holding-pen files the archive already has
//! - `fetch-delete`: download the reported files and remove them from their buckets

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use holdpen_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "holdpen", about = "Reconcile the holding pen against the archive")]
struct Cli {
    /// Enable debug logging on the console
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// TOML configuration file (defaults to $HOLDPEN_HOME/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log to stderr only, without the rolling log file
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the holding pen and report files already present in the archive
    FindArchived {
        /// Report file to write
        #[arg(short, long, default_value = "report.csv")]
        output: PathBuf,

        /// Holding-pen bucket to scan
        #[arg(long)]
        target: Option<String>,

        /// Bucket holding the proxies
        #[arg(long)]
        proxy: Option<String>,

        /// Base URL of the archive index
        #[arg(long, env = "HOLDPEN_ELASTIC_URL")]
        elastic: Option<String>,

        /// Index to search
        #[arg(long, env = "HOLDPEN_INDEX")]
        index: Option<String>,

        /// Buckets whose copies do not count (comma separated)
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Index lookup workers
        #[arg(long)]
        threads: Option<usize>,

        /// Proxy search workers
        #[arg(long)]
        proxy_threads: Option<usize>,

        /// Timeout for each remote call, in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Only write rows for files that have archived copies
        #[arg(long)]
        only_with_duplicates: bool,
    },

    /// Download the files listed in a report, then delete them
    FetchDelete {
        /// Report produced by find-archived
        #[arg(short, long, default_value = "report.csv")]
        input: PathBuf,

        /// Bucket the reported files live in
        #[arg(long)]
        bucket: Option<String>,

        /// Download workers
        #[arg(long)]
        fetch_threads: Option<usize>,

        /// Delete workers
        #[arg(long)]
        threads: Option<usize>,

        /// Directory downloads are written under
        #[arg(long)]
        download_root: Option<PathBuf>,

        /// Timeout for each download, in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Delete without downloading first
        #[arg(long)]
        skip_download: bool,

        /// Actually delete; without this only the intended deletions are logged
        #[arg(long)]
        really_delete: bool,
    },
}

fn run_command(cli: Cli) -> Result<()> {
    let config = cli::load_config(cli.config.as_deref())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("holdpen-io")
        .build()
        .context("Failed to start async runtime")?;
    let handle = runtime.handle().clone();

    let result = match cli.command {
        Commands::FindArchived {
            output,
            target,
            proxy,
            elastic,
            index,
            exclude,
            threads,
            proxy_threads,
            timeout_secs,
            only_with_duplicates,
        } => cli::find_archived::run(
            cli::find_archived::FindArchivedArgs {
                output,
                target,
                proxy,
                elastic,
                index,
                exclude,
                threads,
                proxy_threads,
                timeout_secs,
                only_with_duplicates,
            },
            config,
            handle,
        ),
        Commands::FetchDelete {
            input,
            bucket,
            fetch_threads,
            threads,
            download_root,
            timeout_secs,
            skip_download,
            really_delete,
        } => cli::fetch_delete::run(
            cli::fetch_delete::FetchDeleteArgs {
                input,
                bucket,
                fetch_threads,
                delete_threads: threads,
                download_root,
                timeout_secs,
                skip_download,
                really_delete,
            },
            config,
            handle,
        ),
    };

    runtime.shutdown_background();
    result
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(LogConfig {
        app_name: "holdpen",
        verbose: cli.verbose,
        console_only: cli.no_log_file,
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: {:#}", err);
            None
        }
    };

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}
