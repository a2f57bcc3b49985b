//! Local-filesystem store backing `file://` URIs.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use color_eyre::eyre::{eyre, Result, WrapErr};
use dumpsync_core::hash::ContentHash;

use crate::object::{ObjectInfo, ObjectStore, ObjectUri, ReadSeek};

/// Store over plain filesystem paths.
#[derive(Debug, Clone, Default)]
pub struct LocalStore;

impl LocalStore {
    /// Create a local store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn path_of(uri: &ObjectUri) -> Result<PathBuf> {
        let path = uri
            .as_str()
            .strip_prefix("file://")
            .ok_or_else(|| eyre!("not a file:// URI: {uri}"))?;
        if path.is_empty() {
            return Err(eyre!("empty path in {uri}"));
        }
        Ok(PathBuf::from(path))
    }
}

impl ObjectStore for LocalStore {
    fn object_info(&self, uri: &ObjectUri) -> Result<Option<ObjectInfo>> {
        let path = Self::path_of(uri)?;
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).wrap_err_with(|| format!("stat {uri}")),
        };
        let content_hash = ContentHash::from_file(&path)
            .wrap_err_with(|| format!("hashing {uri}"))?;
        Ok(Some(ObjectInfo {
            size: metadata.len(),
            content_hash,
        }))
    }

    fn reader(&self, uri: &ObjectUri) -> Result<Box<dyn ReadSeek + Send>> {
        let path = Self::path_of(uri)?;
        let file = fs::File::open(&path).wrap_err_with(|| format!("opening {uri}"))?;
        Ok(Box::new(file))
    }

    fn writer(&self, uri: &ObjectUri) -> Result<Box<dyn Write + Send>> {
        let path = Self::path_of(uri)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("creating parent dirs for {uri}"))?;
        }
        let file = fs::File::create(&path).wrap_err_with(|| format!("creating {uri}"))?;
        Ok(Box::new(file))
    }

    fn copy(&self, from: &ObjectUri, to: &ObjectUri) -> Result<()> {
        let from_path = Self::path_of(from)?;
        let to_path = Self::path_of(to)?;
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("creating parent dirs for {to}"))?;
        }
        fs::copy(&from_path, &to_path)
            .wrap_err_with(|| format!("copying {from} to {to}"))?;
        Ok(())
    }

    fn delete(&self, uri: &ObjectUri) -> Result<bool> {
        let path = Self::path_of(uri)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).wrap_err_with(|| format!("deleting {uri}")),
        }
    }
}
