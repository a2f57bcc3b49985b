//! Source directory scanning.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::hash::ContentHash;

/// One file selected for syncing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute path on the local filesystem.
    pub path: PathBuf,
    /// Destination object name, relative to the target prefix.
    pub name: String,
    /// Size in bytes at scan time.
    pub size: u64,
    /// Local content hash, populated lazily during classification.
    pub hash: Option<ContentHash>,
}

/// Selection rules applied while scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanFilter {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Glob pattern files must match, e.g. `*.sql`.
    pub pattern: Option<String>,
    /// Glob patterns to exclude.
    pub exclude: Vec<String>,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            recursive: true,
            pattern: None,
            exclude: Vec::new(),
        }
    }
}

/// Walks a source root and produces the candidate file list.
pub struct Scanner {
    root: PathBuf,
    filter: ScanFilter,
}

impl Scanner {
    /// Create a scanner over `root` with the given filter.
    pub fn new(root: impl Into<PathBuf>, filter: ScanFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    /// Walk the root, returning entries sorted by path. Unreadable entries
    /// are logged and skipped; the scan itself only fails if the root is
    /// unusable.
    ///
    /// # Errors
    /// Returns an error if the root does not exist or the filter globs are
    /// invalid.
    pub fn scan(&self) -> Result<Vec<FileEntry>> {
        if !self.root.is_dir() {
            return Err(CoreError::config(format!(
                "source root is not a directory: {}",
                self.root.display()
            )));
        }

        let mut builder = WalkBuilder::new(&self.root);
        builder.standard_filters(false).follow_links(false);
        if !self.filter.recursive {
            builder.max_depth(Some(1));
        }

        let mut overrides = OverrideBuilder::new(&self.root);
        if let Some(pattern) = &self.filter.pattern {
            overrides
                .add(pattern)
                .map_err(|e| CoreError::config(format!("bad pattern {pattern:?}: {e}")))?;
        }
        for exclude in &self.filter.exclude {
            overrides
                .add(&format!("!{exclude}"))
                .map_err(|e| CoreError::config(format!("bad exclude {exclude:?}: {e}")))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| CoreError::config(format!("filter globs: {e}")))?;
        builder.overrides(overrides);

        let mut entries = Vec::new();
        let mut seen_names = HashSet::new();
        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path = %entry.path().display(), "skipping entry without metadata: {e}");
                    continue;
                }
            };
            let name = match destination_name(&self.root, entry.path()) {
                Some(name) => name,
                None => {
                    warn!(path = %entry.path().display(), "skipping entry outside root");
                    continue;
                }
            };
            if !seen_names.insert(name.clone()) {
                warn!(name = %name, "skipping duplicate destination name");
                continue;
            }
            entries.push(FileEntry {
                path: entry.path().to_path_buf(),
                name,
                size: metadata.len(),
                hash: None,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

fn destination_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str()?.to_string());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write(dir: &TempDir, rel: &str, content: &[u8]) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn scans_recursively_and_sorts() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.sql", b"bbb");
        write(&dir, "nested/a.sql", b"aaaa");

        let entries = Scanner::new(dir.path(), ScanFilter::default())
            .scan()
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "b.sql");
        assert_eq!(entries[0].size, 3);
        assert_eq!(entries[1].name, "nested/a.sql");
        assert_eq!(entries[1].size, 4);
    }

    #[test]
    fn non_recursive_stays_at_top_level() {
        let dir = TempDir::new().unwrap();
        write(&dir, "top.sql", b"x");
        write(&dir, "nested/deep.sql", b"y");

        let filter = ScanFilter {
            recursive: false,
            ..ScanFilter::default()
        };
        let entries = Scanner::new(dir.path(), filter).scan().unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "top.sql");
    }

    #[test]
    fn pattern_and_exclude_filters_apply() {
        let dir = TempDir::new().unwrap();
        write(&dir, "keep.sql", b"k");
        write(&dir, "skip.log", b"s");
        write(&dir, "old.sql.bak", b"b");

        let filter = ScanFilter {
            recursive: true,
            pattern: Some("*.sql".to_string()),
            exclude: vec!["*.bak".to_string()],
        };
        let entries = Scanner::new(dir.path(), filter).scan().unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "keep.sql");
    }

    #[test]
    fn missing_root_is_config_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let err = Scanner::new(missing, ScanFilter::default())
            .scan()
            .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }
}
