//! Classification of scanned files against the destination.

use color_eyre::eyre::Result;
use dumpsync_core::hash::ContentHash;
use dumpsync_core::scan::FileEntry;
use dumpsync_store::{ObjectStore, ObjectUri};
use tracing::{debug, warn};

/// Outcome of comparing the scan against the destination.
#[derive(Debug, Default)]
pub struct Classified {
    /// Files to upload whole: absent at the destination or below the
    /// delta-sync size threshold.
    pub upload: Vec<FileEntry>,
    /// Files to delta-sync, each carrying its local content hash.
    pub delta_sync: Vec<FileEntry>,
    /// Count of files already matching the destination.
    pub in_sync: usize,
    /// Files excluded because the local content could not be hashed.
    pub errors: Vec<(String, String)>,
}

/// Decide per file whether to skip, upload whole, or delta-sync.
///
/// A destination lookup failure is treated as absence so one flaky stat
/// cannot stall the run; the upload path will surface a real backend
/// problem. A local read failure excludes the file from the run.
///
/// # Errors
/// Currently infallible at the run level; per-file problems land in
/// [`Classified::errors`]. The signature leaves room for backends whose
/// listing itself can fail.
pub fn classify(
    entries: Vec<FileEntry>,
    store: &dyn ObjectStore,
    target: &ObjectUri,
    size_threshold: u64,
) -> Result<Classified> {
    let mut classified = Classified::default();

    for mut entry in entries {
        let dest = target.join(&entry.name);
        let info = match store.object_info(&dest) {
            Ok(info) => info,
            Err(e) => {
                warn!(name = %entry.name, "destination lookup failed, treating as absent: {e:#}");
                None
            }
        };

        let Some(info) = info else {
            debug!(name = %entry.name, "absent at destination, uploading whole");
            classified.upload.push(entry);
            continue;
        };

        let local_hash = match ContentHash::from_file(&entry.path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(name = %entry.name, "cannot hash local file, excluding: {e}");
                classified.errors.push((entry.name, e.to_string()));
                continue;
            }
        };

        if local_hash == info.content_hash {
            debug!(name = %entry.name, "already in sync");
            classified.in_sync += 1;
            continue;
        }

        if entry.size >= size_threshold {
            entry.hash = Some(local_hash);
            classified.delta_sync.push(entry);
        } else {
            debug!(name = %entry.name, size = entry.size, "below threshold, uploading whole");
            classified.upload.push(entry);
        }
    }

    Ok(classified)
}
