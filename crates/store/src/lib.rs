//! Object store abstraction used by the sync pipeline.
//!
//! The driver, the remote worker, and the tests all talk to storage
//! through [`ObjectStore`]. Two backends ship here: [`LocalStore`] for
//! `file://` URIs and [`MemoryStore`] for in-process use.

pub mod local;
pub mod memory;
pub mod object;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use object::{open_store, ObjectInfo, ObjectStore, ObjectUri, ReadSeek};
