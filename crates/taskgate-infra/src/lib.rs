//! Infrastructure layer for taskgate.
//!
//! Contains implementations of the ports defined in `taskgate-core`: an
//! in-process object store and workload backend, the secret lookup chain,
//! webhook request authentication, and manifest and config loading.

pub mod config;
pub mod manifest;
pub mod memory;
pub mod secret;
pub mod webhook;
