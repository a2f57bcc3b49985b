//! Core delta-sync engine.
//!
//! Mirrors large local files into object storage with rsync-style delta
//! sync: the destination side publishes per-block checksums, the source
//! side diffs new content against them, and a reconstruct step rebuilds
//! the new content remotely from copy/literal instructions. This crate
//! holds the pure pieces: hashing, the delta codec, staging artifact
//! encoding, directory scanning, partitioning, and configuration.

pub mod artifact;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod partition;
pub mod scan;

pub use codec::{ChecksumBlock, DeltaCodec, Instruction, DEFAULT_BLOCK_SIZE};
pub use config::{SyncConfig, CONFIG_FILE, DEFAULT_SIZE_THRESHOLD};
pub use error::{CoreError, Result};
pub use hash::{BlockDigest, ContentHash, HashingWriter, RollingChecksum};
pub use partition::{partition, SyncPartition};
pub use scan::{FileEntry, ScanFilter, Scanner};
