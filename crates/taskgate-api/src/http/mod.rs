//! HTTP surface: webhook intake plus liveness and readiness probes.

pub mod error;
pub mod handlers;
pub mod router;
