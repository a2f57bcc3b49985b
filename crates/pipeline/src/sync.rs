//! Top-level sync driver: scan, classify, partition, run partitions in
//! parallel, then upload whole files.

use color_eyre::eyre::{Result, WrapErr};
use dumpsync_core::config::SyncConfig;
use dumpsync_core::partition::partition;
use dumpsync_core::scan::Scanner;
use dumpsync_store::{ObjectStore, ObjectUri};
use tracing::{error, info, warn};

use crate::classify::classify;
use crate::orchestrator::Orchestrator;
use crate::runner::JobRunner;

/// What one sync run accomplished.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Files already matching the destination.
    pub in_sync: usize,
    /// Files uploaded whole.
    pub uploaded: Vec<String>,
    /// Files whose partition pipeline completed.
    pub delta_synced: Vec<String>,
    /// Files that failed, with reasons.
    pub failed: Vec<(String, String)>,
    /// Partitions whose pipeline aborted.
    pub partitions_failed: usize,
}

impl SyncReport {
    /// Whether anything in the run failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || self.partitions_failed > 0
    }

    /// Log a one-line summary at the appropriate level.
    pub fn log_summary(&self) {
        if self.has_failures() {
            error!(
                in_sync = self.in_sync,
                uploaded = self.uploaded.len(),
                delta_synced = self.delta_synced.len(),
                failed = self.failed.len(),
                partitions_failed = self.partitions_failed,
                "sync finished with failures"
            );
        } else {
            info!(
                in_sync = self.in_sync,
                uploaded = self.uploaded.len(),
                delta_synced = self.delta_synced.len(),
                "sync complete"
            );
        }
    }
}

/// Run a full sync: scan the source root, classify against the
/// destination, delta-sync changed large files across parallel partitions,
/// and upload the rest whole.
///
/// Partition failures are isolated: a failed partition marks its files
/// failed but never blocks other partitions or the upload step.
///
/// # Errors
/// Returns an error if configuration or the scan itself is unusable.
/// Per-file and per-partition failures land in the report instead.
pub fn run_sync(
    config: &SyncConfig,
    store: &dyn ObjectStore,
    runner: &dyn JobRunner,
) -> Result<SyncReport> {
    config.validate().wrap_err("invalid configuration")?;
    let target = ObjectUri::new(config.target.clone());

    let entries = Scanner::new(&config.source_root, config.filter.clone())
        .scan()
        .wrap_err("scanning source root")?;
    info!(files = entries.len(), root = %config.source_root.display(), "scan complete");

    let classified = classify(entries, store, &target, config.size_threshold)?;
    info!(
        upload = classified.upload.len(),
        delta_sync = classified.delta_sync.len(),
        in_sync = classified.in_sync,
        excluded = classified.errors.len(),
        "classification complete"
    );

    let mut report = SyncReport {
        in_sync: classified.in_sync,
        failed: classified.errors,
        ..SyncReport::default()
    };

    let partitions = partition(classified.delta_sync, config.worker_count);
    let outcomes: Vec<(Vec<String>, Result<()>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = partitions
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| {
                let names: Vec<String> = p.files.iter().map(|f| f.name.clone()).collect();
                let handle =
                    scope.spawn(move || Orchestrator::new(config, store, runner).run(p));
                (names, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(names, handle)| {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(color_eyre::eyre::eyre!("worker panicked")));
                (names, result)
            })
            .collect()
    });

    for (names, result) in outcomes {
        match result {
            Ok(()) => report.delta_synced.extend(names),
            Err(e) => {
                error!("partition failed: {e:#}");
                report.partitions_failed += 1;
                let reason = format!("{e:#}");
                for name in names {
                    report.failed.push((name, reason.clone()));
                }
            }
        }
    }

    for entry in classified.upload {
        let dest = target.join(&entry.name);
        match store.upload_file(&entry.path, &dest) {
            Ok(()) => {
                info!(name = %entry.name, size = entry.size, "uploaded");
                report.uploaded.push(entry.name);
            }
            Err(e) => {
                warn!(name = %entry.name, "upload failed: {e:#}");
                report.failed.push((entry.name, format!("{e:#}")));
            }
        }
    }

    Ok(report)
}
