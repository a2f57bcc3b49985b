//! Remote worker routines: checksum generation and reconstruction.
//!
//! These run where the destination objects live, invoked by the agent
//! binary. Both phases read a manifest of object names from staging and
//! work through it file by file; one bad file never stops the rest.

use std::io::Cursor;

use color_eyre::eyre::{eyre, Result, WrapErr};
use dumpsync_core::artifact::{
    self, checksum_artifact_name, instruction_artifact_name, temp_object_name,
};
use dumpsync_core::codec::DeltaCodec;
use dumpsync_core::error::CoreError;
use dumpsync_core::hash::{ContentHash, HashingWriter};
use dumpsync_store::{ObjectStore, ObjectUri};
use tracing::{error, info, warn};

/// Per-phase tallies reported by a worker.
#[derive(Debug, Default)]
pub struct PhaseSummary {
    /// Files the phase completed work for.
    pub processed: usize,
    /// Files skipped: absent at the destination or already up to date.
    pub skipped: usize,
    /// Reconstructions whose output hash did not match the recorded hash.
    /// The destination is left untouched for these.
    pub mismatched: usize,
    /// Files that hit infrastructure failures, with reasons.
    pub failed: Vec<(String, String)>,
}

impl PhaseSummary {
    /// Whether any file hit an infrastructure failure.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

fn read_manifest(store: &dyn ObjectStore, manifest: &ObjectUri) -> Result<Vec<String>> {
    let bytes = store
        .read_bytes(manifest)
        .wrap_err_with(|| format!("reading manifest {manifest}"))?;
    artifact::read_manifest(&mut Cursor::new(bytes)).map_err(|e| eyre!(e))
}

/// Delete a partially-written artifact so a later run never mistakes it
/// for a complete one. Failure to delete only warns; the next reader will
/// reject the artifact as corrupt anyway.
fn delete_partial(store: &dyn ObjectStore, uri: &ObjectUri) {
    if let Err(e) = store.delete(uri) {
        warn!("could not delete partial artifact {uri}, delete it manually: {e:#}");
    }
}

/// Generate checksum artifacts for every manifest entry that exists at the
/// destination.
///
/// An artifact whose header already matches the current destination content
/// is left alone, so a rerun after a crash only redoes the missing work.
///
/// # Errors
/// Returns an error only if the manifest itself cannot be read; per-file
/// failures are collected in the summary.
pub fn generate_checksums(
    store: &dyn ObjectStore,
    staging: &ObjectUri,
    target: &ObjectUri,
    manifest: &ObjectUri,
    block_size: u32,
) -> Result<PhaseSummary> {
    let names = read_manifest(store, manifest)?;
    let codec = DeltaCodec::new(block_size);
    let mut summary = PhaseSummary::default();

    for name in names {
        let dest = target.join(&name);
        let artifact_uri = staging.join(&checksum_artifact_name(&name));

        let info_result = store.object_info(&dest);
        let dest_info = match info_result {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!(name = %name, "not at destination, nothing to checksum");
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                summary.failed.push((name, format!("{e:#}")));
                continue;
            }
        };

        if let Ok(mut reader) = store.reader(&artifact_uri) {
            match artifact::header_matches(&mut reader, &dest_info.content_hash) {
                Ok(true) => {
                    info!(name = %name, "checksums already computed for current content");
                    summary.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(name = %name, "unreadable checksum artifact header, regenerating: {e}");
                    delete_partial(store, &artifact_uri);
                }
            }
        }

        let result = (|| -> Result<()> {
            let content = store.read_bytes(&dest)?;
            let hash = ContentHash::from_bytes(&content);
            let blocks = codec.generate_checksums(&content);
            let mut buf = Vec::new();
            artifact::write_checksum_artifact(&mut buf, &hash, &blocks)?;
            store.write_bytes(&artifact_uri, &buf)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                info!(name = %name, "wrote checksum artifact");
                summary.processed += 1;
            }
            Err(e) => {
                error!(name = %name, "checksum generation failed: {e:#}");
                delete_partial(store, &artifact_uri);
                summary.failed.push((name, format!("{e:#}")));
            }
        }
    }

    Ok(summary)
}

/// Rebuild destination objects from instruction artifacts.
///
/// Output lands in a staging temp object, its hash is checked against the
/// hash recorded in the artifact header, and only a match is promoted over
/// the destination. A mismatch leaves the destination untouched. Staging
/// artifacts for a file are removed once it has been handled, and the
/// manifest is removed at the end.
///
/// # Errors
/// Returns an error only if the manifest itself cannot be read; per-file
/// failures are collected in the summary.
pub fn reconstruct(
    store: &dyn ObjectStore,
    staging: &ObjectUri,
    target: &ObjectUri,
    manifest: &ObjectUri,
) -> Result<PhaseSummary> {
    let names = read_manifest(store, manifest)?;
    let codec = DeltaCodec::default();
    let mut summary = PhaseSummary::default();

    for name in names {
        let dest = target.join(&name);
        let instruction_uri = staging.join(&instruction_artifact_name(&name));
        let temp_uri = staging.join(&temp_object_name(&name));

        let outcome = reconstruct_one(store, &codec, &dest, &instruction_uri, &temp_uri);
        match outcome {
            Ok(ReconstructOutcome::Promoted) => {
                info!(name = %name, "reconstructed and promoted");
                summary.processed += 1;
            }
            Ok(ReconstructOutcome::NoInstructions) => {
                info!(name = %name, "no instruction artifact, nothing to reconstruct");
                summary.skipped += 1;
            }
            Ok(ReconstructOutcome::Mismatch { expected, actual }) => {
                error!(
                    name = %name,
                    expected = %expected,
                    actual = %actual,
                    "reconstructed content does not match recorded hash, destination left untouched"
                );
                summary.mismatched += 1;
            }
            Err(e) => {
                error!(name = %name, "reconstruction failed: {e:#}");
                summary.failed.push((name.clone(), format!("{e:#}")));
            }
        }

        cleanup_staging(store, staging, &name);
    }

    if let Err(e) = store.delete(manifest) {
        warn!("could not delete manifest {manifest}: {e:#}");
    }

    Ok(summary)
}

enum ReconstructOutcome {
    Promoted,
    NoInstructions,
    Mismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
}

fn reconstruct_one(
    store: &dyn ObjectStore,
    codec: &DeltaCodec,
    dest: &ObjectUri,
    instruction_uri: &ObjectUri,
    temp_uri: &ObjectUri,
) -> Result<ReconstructOutcome> {
    if store.object_info(instruction_uri)?.is_none() {
        return Ok(ReconstructOutcome::NoInstructions);
    }

    let artifact_bytes = store.read_bytes(instruction_uri)?;
    let (expected, instructions) =
        match artifact::read_instruction_artifact(&mut Cursor::new(&artifact_bytes)) {
            Ok(decoded) => decoded,
            Err(e @ CoreError::Decode { .. }) => {
                delete_partial(store, instruction_uri);
                return Err(eyre!(e).wrap_err("corrupt instruction artifact"));
            }
            Err(e) => return Err(eyre!(e)),
        };

    let mut base = store.reader(dest)?;
    let mut writer = HashingWriter::new(store.writer(temp_uri)?);
    codec.reconstruct(&mut base, &instructions, &mut writer)?;
    let (inner, actual) = writer.finalize();
    // Close the temp object before comparing or copying.
    drop(inner);
    if actual != expected {
        delete_partial(store, temp_uri);
        return Ok(ReconstructOutcome::Mismatch { expected, actual });
    }

    store.copy(temp_uri, dest)?;
    Ok(ReconstructOutcome::Promoted)
}

/// Remove all staging artifacts for one file. Best effort; leftovers only
/// cost storage until the next run regenerates them.
pub fn cleanup_staging(store: &dyn ObjectStore, staging: &ObjectUri, name: &str) {
    for artifact_name in [
        checksum_artifact_name(name),
        instruction_artifact_name(name),
        temp_object_name(name),
    ] {
        let uri = staging.join(&artifact_name);
        if let Err(e) = store.delete(&uri) {
            warn!("could not delete staging object {uri}: {e:#}");
        }
    }
}
