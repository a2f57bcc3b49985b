//! Remote worker binary. Runs where the destination objects live and
//! executes one pipeline phase per invocation.

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use dumpsync_pipeline::remote;
use dumpsync_store::{open_store, ObjectUri};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dumpsync-agent", version, about = "dumpsync remote worker")]
struct Cli {
    /// Log at debug level by default.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate checksum artifacts for every manifest entry present at the
    /// destination.
    GenerateChecksums {
        /// Staging URI prefix holding the manifest and artifacts.
        #[arg(long)]
        staging: String,
        /// Destination URI prefix.
        #[arg(long)]
        target: String,
        /// Manifest object URI.
        #[arg(long)]
        manifest: String,
        /// Block size for checksum generation.
        #[arg(long, default_value_t = 4096)]
        block_size: u32,
    },
    /// Rebuild destination objects from instruction artifacts.
    Reconstruct {
        /// Staging URI prefix holding the manifest and artifacts.
        #[arg(long)]
        staging: String,
        /// Destination URI prefix.
        #[arg(long)]
        target: String,
        /// Manifest object URI.
        #[arg(long)]
        manifest: String,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();
    let summary = match cli.command {
        Command::GenerateChecksums {
            staging,
            target,
            manifest,
            block_size,
        } => {
            let staging = ObjectUri::new(staging);
            let store = open_store(&staging)?;
            remote::generate_checksums(
                store.as_ref(),
                &staging,
                &ObjectUri::new(target),
                &ObjectUri::new(manifest),
                block_size,
            )?
        }
        Command::Reconstruct {
            staging,
            target,
            manifest,
        } => {
            let staging = ObjectUri::new(staging);
            let store = open_store(&staging)?;
            remote::reconstruct(
                store.as_ref(),
                &staging,
                &ObjectUri::new(target),
                &ObjectUri::new(manifest),
            )?
        }
    };

    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        mismatched = summary.mismatched,
        failed = summary.failed.len(),
        "phase complete"
    );

    // Hash mismatches are logged per file but do not fail the job; the
    // destination was left untouched for those. Infrastructure failures do.
    if summary.has_failures() {
        for (name, reason) in &summary.failed {
            error!(name = %name, "failed: {reason}");
        }
        std::process::exit(1);
    }
    Ok(())
}
