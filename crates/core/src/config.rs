//! Sync configuration, loaded from `.dumpsync.toml` with per-field
//! defaults so a partial file only overrides what it names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::DEFAULT_BLOCK_SIZE;
use crate::error::{CoreError, Result};
use crate::scan::ScanFilter;

/// Config file name looked up in the source root.
pub const CONFIG_FILE: &str = ".dumpsync.toml";

/// Files at or above this size go through delta sync by default (10 MiB).
pub const DEFAULT_SIZE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Full configuration for one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local directory holding the files to mirror.
    pub source_root: PathBuf,
    /// Destination URI prefix, e.g. `file:///backups/current`.
    pub target: String,
    /// Staging URI prefix for manifests and artifacts.
    pub staging: String,
    /// Number of parallel partitions.
    pub worker_count: usize,
    /// Per-job timeout for remote work, in seconds.
    pub job_timeout_secs: u64,
    /// Block size for checksum generation.
    pub block_size: u32,
    /// Minimum file size eligible for delta sync; smaller files upload whole.
    pub size_threshold: u64,
    /// Command used to launch the remote worker binary.
    pub agent_command: String,
    /// File selection rules.
    pub filter: ScanFilter,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("."),
            target: String::new(),
            staging: String::new(),
            worker_count: 4,
            job_timeout_secs: 600,
            block_size: DEFAULT_BLOCK_SIZE,
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            agent_command: "dumpsync-agent".to_string(),
            filter: ScanFilter::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from `.dumpsync.toml` under `root`, falling back
    /// to defaults when the file is absent.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| CoreError::config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Per-job timeout as a [`Duration`].
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Check the configuration is usable for a sync run.
    ///
    /// # Errors
    /// Returns a config error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(CoreError::config("target must not be empty"));
        }
        if self.staging.is_empty() {
            return Err(CoreError::config("staging must not be empty"));
        }
        if self.worker_count == 0 {
            return Err(CoreError::config("worker_count must be at least 1"));
        }
        if self.block_size == 0 {
            return Err(CoreError::config("block_size must be at least 1"));
        }
        if self.job_timeout_secs == 0 {
            return Err(CoreError::config("job_timeout_secs must be at least 1"));
        }
        Ok(())
    }
}
