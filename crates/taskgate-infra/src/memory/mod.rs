//! In-process implementations of the store and workload contracts.
//!
//! Suitable for a single-instance deployment and for tests. Nothing is
//! persisted across restarts; seed objects come from manifests.

pub mod store;
pub mod workload;

pub use store::MemoryStore;
pub use workload::MemoryWorkloads;
