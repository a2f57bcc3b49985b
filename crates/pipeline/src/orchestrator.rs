//! Per-partition pipeline orchestration.
//!
//! Each partition runs four phases in order: write the manifest, dispatch
//! the remote checksum job, generate instruction artifacts locally, then
//! dispatch the remote reconstruct job. The orchestrator owns the run id
//! so concurrent partitions never collide on manifest names.

use std::fs;
use std::io::Cursor;

use color_eyre::eyre::{Result, WrapErr};
use dumpsync_core::artifact::{
    self, checksum_artifact_name, instruction_artifact_name, manifest_name,
};
use dumpsync_core::codec::DeltaCodec;
use dumpsync_core::config::SyncConfig;
use dumpsync_core::error::CoreError;
use dumpsync_core::hash::ContentHash;
use dumpsync_core::partition::SyncPartition;
use dumpsync_core::scan::FileEntry;
use dumpsync_store::{ObjectStore, ObjectUri};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::runner::JobRunner;

/// Drives the four-phase pipeline for one partition.
pub struct Orchestrator<'a> {
    config: &'a SyncConfig,
    store: &'a dyn ObjectStore,
    runner: &'a dyn JobRunner,
    staging: ObjectUri,
    target: ObjectUri,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator bound to one store and job runner.
    pub fn new(
        config: &'a SyncConfig,
        store: &'a dyn ObjectStore,
        runner: &'a dyn JobRunner,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            staging: ObjectUri::new(config.staging.clone()),
            target: ObjectUri::new(config.target.clone()),
        }
    }

    /// Run the full pipeline for one partition. An empty partition is a
    /// no-op. Any phase failure aborts the partition; other partitions are
    /// unaffected because each has its own manifest.
    ///
    /// # Errors
    /// Returns the first phase failure.
    pub fn run(&self, partition: &SyncPartition) -> Result<()> {
        if partition.is_empty() {
            return Ok(());
        }

        let run_id = Uuid::new_v4().to_string();
        let manifest = self.staging.join(&manifest_name(&run_id));
        info!(
            run_id = %run_id,
            files = partition.files.len(),
            bytes = partition.total_bytes,
            "starting partition pipeline"
        );

        self.write_manifest(&manifest, partition)?;
        self.dispatch_checksum_job(&manifest)?;
        for file in &partition.files {
            self.generate_instructions(file)?;
        }
        self.dispatch_reconstruct_job(&manifest)?;

        info!(run_id = %run_id, "partition pipeline complete");
        Ok(())
    }

    fn write_manifest(&self, manifest: &ObjectUri, partition: &SyncPartition) -> Result<()> {
        let names: Vec<String> = partition.files.iter().map(|f| f.name.clone()).collect();
        let mut buf = Vec::new();
        artifact::write_manifest(&mut buf, &names)?;
        self.store
            .write_bytes(manifest, &buf)
            .wrap_err("writing manifest")
    }

    fn dispatch_checksum_job(&self, manifest: &ObjectUri) -> Result<()> {
        let command = format!(
            "{} generate-checksums --staging {} --target {} --manifest {} --block-size {}",
            self.config.agent_command, self.staging, self.target, manifest, self.config.block_size
        );
        self.runner
            .submit(&command, self.config.job_timeout())
            .wrap_err("checksum job")
    }

    fn dispatch_reconstruct_job(&self, manifest: &ObjectUri) -> Result<()> {
        let command = format!(
            "{} reconstruct --staging {} --target {} --manifest {}",
            self.config.agent_command, self.staging, self.target, manifest
        );
        self.runner
            .submit(&command, self.config.job_timeout())
            .wrap_err("reconstruct job")
    }

    /// Diff one source file against its checksum artifact and write the
    /// instruction artifact. Skips the diff when an instruction artifact
    /// for the current content already exists.
    fn generate_instructions(&self, file: &FileEntry) -> Result<()> {
        let checksum_uri = self.staging.join(&checksum_artifact_name(&file.name));
        let instruction_uri = self.staging.join(&instruction_artifact_name(&file.name));

        let Some(recorded) = file.hash else {
            // Classification always records the hash for delta candidates.
            warn!(name = %file.name, "no recorded hash, skipping delta");
            return Ok(());
        };

        if let Ok(mut reader) = self.store.reader(&instruction_uri) {
            match artifact::header_matches(&mut reader, &recorded) {
                Ok(true) => {
                    info!(name = %file.name, "instructions already computed for current content");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(name = %file.name, "unreadable instruction artifact header, regenerating: {e}");
                    delete_partial(self.store, &instruction_uri);
                }
            }
        }

        if self.store.object_info(&checksum_uri)?.is_none() {
            // The destination was absent when the worker ran; nothing to
            // diff against, the reconstruct phase will skip this file too.
            warn!(name = %file.name, "no checksum artifact, skipping delta");
            return Ok(());
        }

        let artifact_bytes = self.store.read_bytes(&checksum_uri)?;
        let (_, base_blocks) =
            match artifact::read_checksum_artifact(&mut Cursor::new(&artifact_bytes)) {
                Ok(decoded) => decoded,
                Err(e @ CoreError::Decode { .. }) => {
                    delete_partial(self.store, &checksum_uri);
                    return Err(e).wrap_err("corrupt checksum artifact");
                }
                Err(e) => return Err(e.into()),
            };

        let content = fs::read(&file.path)
            .wrap_err_with(|| format!("reading {}", file.path.display()))?;
        let actual = ContentHash::from_bytes(&content);
        if actual != recorded {
            warn!(
                name = %file.name,
                "source changed since classification, syncing current content"
            );
        }

        let codec = DeltaCodec::new(self.config.block_size);
        let instructions = codec.diff(&content, &base_blocks);
        debug!(
            name = %file.name,
            instructions = instructions.len(),
            "computed delta"
        );

        let mut buf = Vec::new();
        artifact::write_instruction_artifact(&mut buf, &actual, &instructions)?;
        if let Err(e) = self.store.write_bytes(&instruction_uri, &buf) {
            delete_partial(self.store, &instruction_uri);
            return Err(e).wrap_err("writing instruction artifact");
        }
        Ok(())
    }
}

fn delete_partial(store: &dyn ObjectStore, uri: &ObjectUri) {
    if let Err(e) = store.delete(uri) {
        warn!("could not delete partial artifact {uri}, delete it manually: {e:#}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use dumpsync_store::MemoryStore;
    use tempfile::TempDir;

    use super::*;

    /// Records commands instead of running them.
    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
    }

    impl JobRunner for RecordingRunner {
        fn submit(&self, command: &str, _timeout: Duration) -> Result<()> {
            self.commands
                .lock()
                .expect("lock poisoned")
                .push(command.to_string());
            Ok(())
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            target: "mem://dest".to_string(),
            staging: "mem://staging".to_string(),
            block_size: 256,
            ..SyncConfig::default()
        }
    }

    fn delta_entry(dir: &TempDir, name: &str, content: &[u8]) -> FileEntry {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        FileEntry {
            path,
            name: name.to_string(),
            size: content.len() as u64,
            hash: Some(ContentHash::from_bytes(content)),
        }
    }

    #[test]
    fn empty_partition_dispatches_nothing() {
        let config = config();
        let store = MemoryStore::new();
        let runner = RecordingRunner::default();

        Orchestrator::new(&config, &store, &runner)
            .run(&SyncPartition::default())
            .unwrap();

        assert!(runner.commands.lock().unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn dispatches_both_jobs_with_manifest() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let store = MemoryStore::new();
        let runner = RecordingRunner::default();
        let entry = delta_entry(&dir, "dump.sql", &vec![5u8; 1024]);
        let partition = SyncPartition {
            total_bytes: entry.size,
            files: vec![entry],
        };

        Orchestrator::new(&config, &store, &runner)
            .run(&partition)
            .unwrap();

        let commands = runner.commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].starts_with("dumpsync-agent generate-checksums"));
        assert!(commands[0].contains("--block-size 256"));
        assert!(commands[1].starts_with("dumpsync-agent reconstruct"));

        // Both jobs name the same manifest object, which was written.
        let manifest_uri = commands[0]
            .split_whitespace()
            .skip_while(|w| *w != "--manifest")
            .nth(1)
            .unwrap()
            .to_string();
        assert!(commands[1].contains(&manifest_uri));
        let bytes = store.read_bytes(&ObjectUri::new(manifest_uri)).unwrap();
        assert_eq!(bytes, b"dump.sql\n");
    }

    #[test]
    fn generates_instructions_when_checksums_present() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let store = MemoryStore::new();
        let runner = RecordingRunner::default();

        let old: Vec<u8> = (0..2048).map(|i| (i % 251) as u8).collect();
        let mut new = old.clone();
        new.extend_from_slice(b"tail");
        let entry = delta_entry(&dir, "dump.sql", &new);

        // Checksum artifact as the worker would have produced it.
        let codec = DeltaCodec::new(256);
        let mut buf = Vec::new();
        artifact::write_checksum_artifact(
            &mut buf,
            &ContentHash::from_bytes(&old),
            &codec.generate_checksums(&old),
        )
        .unwrap();
        store
            .write_bytes(&ObjectUri::new("mem://staging/dump.sql.checksum"), &buf)
            .unwrap();

        let partition = SyncPartition {
            total_bytes: entry.size,
            files: vec![entry],
        };
        Orchestrator::new(&config, &store, &runner)
            .run(&partition)
            .unwrap();

        let bytes = store
            .read_bytes(&ObjectUri::new("mem://staging/dump.sql.instruction"))
            .unwrap();
        let (hash, instructions) =
            artifact::read_instruction_artifact(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(hash, ContentHash::from_bytes(&new));
        assert!(!instructions.is_empty());
    }

    #[test]
    fn matching_instruction_header_skips_diff() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let store = MemoryStore::new();
        let runner = RecordingRunner::default();

        let old: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
        let new = vec![3u8; 1024];
        let entry = delta_entry(&dir, "dump.sql", &new);

        let codec = DeltaCodec::new(256);
        let mut buf = Vec::new();
        artifact::write_checksum_artifact(
            &mut buf,
            &ContentHash::from_bytes(&old),
            &codec.generate_checksums(&old),
        )
        .unwrap();
        store
            .write_bytes(&ObjectUri::new("mem://staging/dump.sql.checksum"), &buf)
            .unwrap();

        // An instruction artifact whose header already names the current
        // source content. The body is deliberately junk; a regenerated
        // artifact would replace it with valid records.
        let mut seeded = Vec::new();
        artifact::write_md5_header(&mut seeded, &ContentHash::from_bytes(&new)).unwrap();
        seeded.extend_from_slice(b"leftover body from a previous run");
        let instruction_uri = ObjectUri::new("mem://staging/dump.sql.instruction");
        store.write_bytes(&instruction_uri, &seeded).unwrap();

        let partition = SyncPartition {
            total_bytes: entry.size,
            files: vec![entry],
        };
        Orchestrator::new(&config, &store, &runner)
            .run(&partition)
            .unwrap();

        assert_eq!(store.read_bytes(&instruction_uri).unwrap(), seeded);
    }

    #[test]
    fn truncated_instruction_header_forces_regeneration() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let store = MemoryStore::new();
        let runner = RecordingRunner::default();

        let old: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
        let new = vec![3u8; 1024];
        let entry = delta_entry(&dir, "dump.sql", &new);

        let codec = DeltaCodec::new(256);
        let mut buf = Vec::new();
        artifact::write_checksum_artifact(
            &mut buf,
            &ContentHash::from_bytes(&old),
            &codec.generate_checksums(&old),
        )
        .unwrap();
        store
            .write_bytes(&ObjectUri::new("mem://staging/dump.sql.checksum"), &buf)
            .unwrap();

        // Fewer than 16 header bytes; the header check cannot succeed.
        let instruction_uri = ObjectUri::new("mem://staging/dump.sql.instruction");
        store.write_bytes(&instruction_uri, b"xyz").unwrap();

        let partition = SyncPartition {
            total_bytes: entry.size,
            files: vec![entry],
        };
        Orchestrator::new(&config, &store, &runner)
            .run(&partition)
            .unwrap();

        let bytes = store.read_bytes(&instruction_uri).unwrap();
        let (hash, instructions) =
            artifact::read_instruction_artifact(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(hash, ContentHash::from_bytes(&new));
        assert!(!instructions.is_empty());
    }

    #[test]
    fn corrupt_checksum_artifact_fails_partition_and_is_deleted() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let store = MemoryStore::new();
        let runner = RecordingRunner::default();
        let entry = delta_entry(&dir, "dump.sql", &vec![9u8; 1024]);

        let checksum_uri = ObjectUri::new("mem://staging/dump.sql.checksum");
        store.write_bytes(&checksum_uri, b"not an artifact at all").unwrap();

        let partition = SyncPartition {
            total_bytes: entry.size,
            files: vec![entry],
        };
        let err = Orchestrator::new(&config, &store, &runner)
            .run(&partition)
            .unwrap_err();

        assert!(err.to_string().contains("corrupt checksum artifact"));
        assert!(store.object_info(&checksum_uri).unwrap().is_none());
    }
}
