//! Delta-sync pipeline.
//!
//! Ties the core engine to object storage: classifies scanned files
//! against the destination, drives the four-phase pipeline per partition,
//! and hosts the routines the remote worker executes. Job dispatch sits
//! behind [`JobRunner`] so tests and single-process setups can run workers
//! in-process.

pub mod classify;
pub mod orchestrator;
pub mod remote;
pub mod runner;
pub mod sync;

pub use classify::{classify, Classified};
pub use orchestrator::Orchestrator;
pub use remote::PhaseSummary;
pub use runner::{JobRunner, ProcessRunner};
pub use sync::{run_sync, SyncReport};
