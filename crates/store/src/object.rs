//! Object store trait and URI handling.

use std::fmt;
use std::io::{Read, Seek, Write};
use std::path::Path;

use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use dumpsync_core::hash::ContentHash;
use serde::{Deserialize, Serialize};

use crate::local::LocalStore;

/// URI naming an object or prefix, e.g. `file:///backups/current/dump.sql`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectUri(String);

impl ObjectUri {
    /// Wrap a URI string.
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// The raw URI string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URI scheme, the part before `://`.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once("://").map(|(scheme, _)| scheme)
    }

    /// Append a path segment, normalizing the joining slash.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        let base = self.0.trim_end_matches('/');
        let segment = segment.trim_start_matches('/');
        Self(format!("{base}/{segment}"))
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ObjectUri {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

/// Metadata the store reports for an existing object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Object size in bytes.
    pub size: u64,
    /// MD5 hash of the object content.
    pub content_hash: ContentHash,
}

/// Read + Seek object for base-content access during reconstruction.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Backend-neutral object storage.
///
/// Implementations are shared across worker threads, so every method takes
/// `&self` and the trait requires `Send + Sync`.
pub trait ObjectStore: Send + Sync {
    /// Look up object metadata, `None` if the object does not exist.
    ///
    /// # Errors
    /// Returns an error on backend failure other than absence.
    fn object_info(&self, uri: &ObjectUri) -> Result<Option<ObjectInfo>>;

    /// Open an object for seekable reading.
    ///
    /// # Errors
    /// Returns an error if the object does not exist or cannot be opened.
    fn reader(&self, uri: &ObjectUri) -> Result<Box<dyn ReadSeek + Send>>;

    /// Open an object for writing, replacing any existing content.
    ///
    /// # Errors
    /// Returns an error if the object cannot be created.
    fn writer(&self, uri: &ObjectUri) -> Result<Box<dyn Write + Send>>;

    /// Copy an object within the store.
    ///
    /// # Errors
    /// Returns an error if the source is missing or the copy fails.
    fn copy(&self, from: &ObjectUri, to: &ObjectUri) -> Result<()>;

    /// Delete an object. Returns `false` if it did not exist.
    ///
    /// # Errors
    /// Returns an error on backend failure other than absence.
    fn delete(&self, uri: &ObjectUri) -> Result<bool>;

    /// Read an entire object into memory.
    ///
    /// # Errors
    /// Returns an error if the object does not exist or reading fails.
    fn read_bytes(&self, uri: &ObjectUri) -> Result<Vec<u8>> {
        let mut reader = self.reader(uri)?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .wrap_err_with(|| format!("reading {uri}"))?;
        Ok(bytes)
    }

    /// Write an entire object from memory.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn write_bytes(&self, uri: &ObjectUri, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer(uri)?;
        writer
            .write_all(bytes)
            .wrap_err_with(|| format!("writing {uri}"))?;
        writer.flush().wrap_err_with(|| format!("flushing {uri}"))?;
        Ok(())
    }

    /// Upload a local file to an object, streaming it through the writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the object written.
    fn upload_file(&self, path: &Path, uri: &ObjectUri) -> Result<()> {
        let mut file = std::fs::File::open(path)
            .wrap_err_with(|| format!("opening {}", path.display()))?;
        let mut writer = self.writer(uri)?;
        std::io::copy(&mut file, &mut writer)
            .wrap_err_with(|| format!("uploading {} to {uri}", path.display()))?;
        writer.flush().wrap_err_with(|| format!("flushing {uri}"))?;
        Ok(())
    }
}

/// Open a store for a URI based on its scheme.
///
/// # Errors
/// Returns an error for unknown schemes. `mem://` stores hold state per
/// instance and must be constructed directly.
pub fn open_store(uri: &ObjectUri) -> Result<Box<dyn ObjectStore>> {
    match uri.scheme() {
        Some("file") => Ok(Box::new(LocalStore::new())),
        Some("mem") => bail!("mem:// stores are per-instance, construct MemoryStore directly"),
        Some(other) => bail!("unsupported store scheme {other:?} in {uri}"),
        None => Err(eyre!("URI has no scheme: {uri}")),
    }
}
