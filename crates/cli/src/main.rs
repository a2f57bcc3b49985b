//! Command-line entry point for dumpsync.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, Result};
use dumpsync_core::config::SyncConfig;
use dumpsync_core::scan::{ScanFilter, Scanner};
use dumpsync_pipeline::runner::ProcessRunner;
use dumpsync_pipeline::sync::run_sync;
use dumpsync_store::{open_store, ObjectUri};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dumpsync",
    version,
    about = "Mirror large local files into object storage with delta sync"
)]
struct Cli {
    /// Log at debug level by default.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync a source directory to the destination.
    Sync {
        /// Source directory holding the files to mirror.
        #[arg(default_value = ".")]
        source: PathBuf,
        /// Destination URI prefix, e.g. file:///backups/current.
        #[arg(long)]
        target: Option<String>,
        /// Staging URI prefix for manifests and artifacts.
        #[arg(long)]
        staging: Option<String>,
        /// Number of parallel partitions.
        #[arg(long)]
        workers: Option<usize>,
        /// Minimum file size in bytes eligible for delta sync.
        #[arg(long)]
        size_threshold: Option<u64>,
        /// Glob pattern files must match, e.g. '*.sql'.
        #[arg(long)]
        pattern: Option<String>,
    },
    /// List the files a sync would consider, without touching storage.
    Scan {
        /// Source directory to scan.
        #[arg(default_value = ".")]
        source: PathBuf,
        /// Glob pattern files must match.
        #[arg(long)]
        pattern: Option<String>,
        /// Output format.
        #[arg(long, value_enum, default_value = "summary")]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Summary,
    Json,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();

    match cli.command {
        Command::Sync {
            source,
            target,
            staging,
            workers,
            size_threshold,
            pattern,
        } => {
            let mut config = SyncConfig::load(&source)?;
            config.source_root = source;
            if let Some(target) = target {
                config.target = target;
            }
            if let Some(staging) = staging {
                config.staging = staging;
            }
            if let Some(workers) = workers {
                config.worker_count = workers;
            }
            if let Some(size_threshold) = size_threshold {
                config.size_threshold = size_threshold;
            }
            if let Some(pattern) = pattern {
                config.filter.pattern = Some(pattern);
            }

            let staging_uri = ObjectUri::new(config.staging.clone());
            let target_uri = ObjectUri::new(config.target.clone());
            if staging_uri.scheme() != target_uri.scheme() {
                bail!(
                    "staging and target must use the same store: {} vs {}",
                    config.staging,
                    config.target
                );
            }
            let store = open_store(&staging_uri)?;
            let runner = ProcessRunner::default();

            let report = run_sync(&config, store.as_ref(), &runner)?;
            report.log_summary();
            if report.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Scan {
            source,
            pattern,
            format,
        } => {
            let filter = ScanFilter {
                pattern,
                ..ScanFilter::default()
            };
            let entries = Scanner::new(source, filter).scan()?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                Format::Summary => {
                    let total: u64 = entries.iter().map(|e| e.size).sum();
                    for entry in &entries {
                        println!("{:>12}  {}", entry.size, entry.name);
                    }
                    println!("{} files, {total} bytes", entries.len());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
