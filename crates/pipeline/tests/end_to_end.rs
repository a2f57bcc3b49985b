//! Full pipeline runs against an in-memory store, with remote jobs
//! executed in-process by parsing the dispatched agent commands.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use color_eyre::eyre::{bail, eyre, Result};
use dumpsync_core::config::SyncConfig;
use dumpsync_pipeline::remote;
use dumpsync_pipeline::runner::JobRunner;
use dumpsync_pipeline::sync::run_sync;
use dumpsync_store::{MemoryStore, ObjectStore, ObjectUri};
use tempfile::TempDir;

/// Executes agent commands in-process against a shared store.
#[derive(Clone)]
struct InlineRunner {
    store: MemoryStore,
}

fn flag_value(tokens: &[&str], flag: &str) -> Result<String> {
    tokens
        .iter()
        .position(|t| *t == flag)
        .and_then(|i| tokens.get(i + 1))
        .map(|v| (*v).to_string())
        .ok_or_else(|| eyre!("missing {flag} in command"))
}

impl JobRunner for InlineRunner {
    fn submit(&self, command: &str, _timeout: Duration) -> Result<()> {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        let staging = ObjectUri::new(flag_value(&tokens, "--staging")?);
        let target = ObjectUri::new(flag_value(&tokens, "--target")?);
        let manifest = ObjectUri::new(flag_value(&tokens, "--manifest")?);

        let summary = match tokens.get(1) {
            Some(&"generate-checksums") => {
                let block_size: u32 = flag_value(&tokens, "--block-size")?.parse()?;
                remote::generate_checksums(&self.store, &staging, &target, &manifest, block_size)?
            }
            Some(&"reconstruct") => {
                remote::reconstruct(&self.store, &staging, &target, &manifest)?
            }
            other => bail!("unexpected agent subcommand: {other:?}"),
        };

        if summary.has_failures() {
            bail!("worker reported failures: {:?}", summary.failed);
        }
        Ok(())
    }
}

fn config(dir: &TempDir) -> SyncConfig {
    SyncConfig {
        source_root: dir.path().to_path_buf(),
        target: "mem://dest".to_string(),
        staging: "mem://staging".to_string(),
        worker_count: 2,
        block_size: 64,
        size_threshold: 1024,
        ..SyncConfig::default()
    }
}

fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 37 % 251) as u8).collect()
}

#[test]
fn appended_bytes_delta_sync_updates_destination() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let runner = InlineRunner {
        store: store.clone(),
    };
    let config = config(&dir);

    let old = sample_bytes(8192);
    let mut new = old.clone();
    new.extend_from_slice(b"rows appended since the last dump");
    store
        .write_bytes(&ObjectUri::new("mem://dest/dump.sql"), &old)
        .unwrap();
    fs::write(dir.path().join("dump.sql"), &new).unwrap();

    let report = run_sync(&config, &store, &runner).unwrap();

    assert!(!report.has_failures());
    assert_eq!(report.delta_synced, vec!["dump.sql"]);
    assert!(report.uploaded.is_empty());
    assert_eq!(
        store
            .read_bytes(&ObjectUri::new("mem://dest/dump.sql"))
            .unwrap(),
        new
    );
    // Staging artifacts and the manifest are gone; only the destination
    // object remains.
    assert_eq!(store.object_names(), vec!["mem://dest/dump.sql"]);
}

#[test]
fn absent_destination_uploads_whole_without_artifacts() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let runner = InlineRunner {
        store: store.clone(),
    };
    let config = config(&dir);

    let content = sample_bytes(8192);
    fs::write(dir.path().join("fresh.sql"), &content).unwrap();

    let report = run_sync(&config, &store, &runner).unwrap();

    assert!(!report.has_failures());
    assert_eq!(report.uploaded, vec!["fresh.sql"]);
    assert!(report.delta_synced.is_empty());
    assert_eq!(
        store
            .read_bytes(&ObjectUri::new("mem://dest/fresh.sql"))
            .unwrap(),
        content
    );
    assert_eq!(store.len(), 1);
}

#[test]
fn unchanged_second_run_does_no_work() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let runner = InlineRunner {
        store: store.clone(),
    };
    let config = config(&dir);

    let content = sample_bytes(4096);
    fs::write(dir.path().join("dump.sql"), &content).unwrap();

    let first = run_sync(&config, &store, &runner).unwrap();
    assert_eq!(first.uploaded, vec!["dump.sql"]);

    let second = run_sync(&config, &store, &runner).unwrap();
    assert_eq!(second.in_sync, 1);
    assert!(second.uploaded.is_empty());
    assert!(second.delta_synced.is_empty());
    assert!(!second.has_failures());
}

#[test]
fn small_changed_file_uploads_whole() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let runner = InlineRunner {
        store: store.clone(),
    };
    let config = config(&dir);

    store
        .write_bytes(&ObjectUri::new("mem://dest/tiny.sql"), b"old")
        .unwrap();
    fs::write(dir.path().join("tiny.sql"), b"new").unwrap();

    let report = run_sync(&config, &store, &runner).unwrap();

    assert_eq!(report.uploaded, vec!["tiny.sql"]);
    assert!(report.delta_synced.is_empty());
    assert_eq!(
        store
            .read_bytes(&ObjectUri::new("mem://dest/tiny.sql"))
            .unwrap(),
        b"new"
    );
}

/// Corrupts instruction artifact headers before running reconstruct, so
/// every reconstruction fails its hash check.
#[derive(Clone)]
struct TamperingRunner {
    inner: InlineRunner,
}

impl JobRunner for TamperingRunner {
    fn submit(&self, command: &str, timeout: Duration) -> Result<()> {
        if command.contains(" reconstruct ") {
            let store = &self.inner.store;
            for name in store.object_names() {
                if name.ends_with(".instruction") {
                    let uri = ObjectUri::new(name);
                    let mut bytes = store.read_bytes(&uri).unwrap();
                    bytes[0] ^= 0xFF;
                    store.write_bytes(&uri, &bytes).unwrap();
                }
            }
        }
        self.inner.submit(command, timeout)
    }
}

#[test]
fn hash_mismatch_leaves_destination_untouched() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let runner = TamperingRunner {
        inner: InlineRunner {
            store: store.clone(),
        },
    };
    let config = config(&dir);

    let old = sample_bytes(4096);
    let mut new = old.clone();
    new.extend_from_slice(b"tail");
    store
        .write_bytes(&ObjectUri::new("mem://dest/dump.sql"), &old)
        .unwrap();
    fs::write(dir.path().join("dump.sql"), &new).unwrap();

    let report = run_sync(&config, &store, &runner).unwrap();

    // A mismatch is not an infrastructure failure; the pipeline completes
    // but the destination keeps its previous content.
    assert!(!report.has_failures());
    assert_eq!(
        store
            .read_bytes(&ObjectUri::new("mem://dest/dump.sql"))
            .unwrap(),
        old
    );
    // The staging temp object never survives a mismatch.
    assert_eq!(store.object_names(), vec!["mem://dest/dump.sql"]);
}

/// Fails the first submitted job, passing the rest through.
struct FailFirstRunner {
    inner: InlineRunner,
    calls: AtomicUsize,
}

impl JobRunner for FailFirstRunner {
    fn submit(&self, command: &str, timeout: Duration) -> Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            bail!("simulated job failure");
        }
        self.inner.submit(command, timeout)
    }
}

#[test]
fn failed_partition_does_not_block_others_or_uploads() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let runner = FailFirstRunner {
        inner: InlineRunner {
            store: store.clone(),
        },
        calls: AtomicUsize::new(0),
    };
    let config = config(&dir);

    // Two delta candidates land in different partitions; one small file
    // uploads regardless.
    for name in ["a.sql", "b.sql"] {
        let old = sample_bytes(8192);
        let mut new = old.clone();
        new.extend_from_slice(name.as_bytes());
        store
            .write_bytes(&ObjectUri::new(format!("mem://dest/{name}")), &old)
            .unwrap();
        fs::write(dir.path().join(name), &new).unwrap();
    }
    fs::write(dir.path().join("small.sql"), b"tiny").unwrap();

    let report = run_sync(&config, &store, &runner).unwrap();

    assert!(report.has_failures());
    assert_eq!(report.partitions_failed, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.delta_synced.len(), 1);
    assert_eq!(report.uploaded, vec!["small.sql"]);

    // The surviving partition actually updated its destination.
    let synced = &report.delta_synced[0];
    let mut expected = sample_bytes(8192);
    expected.extend_from_slice(synced.as_bytes());
    assert_eq!(
        store
            .read_bytes(&ObjectUri::new(format!("mem://dest/{synced}")))
            .unwrap(),
        expected
    );
}
