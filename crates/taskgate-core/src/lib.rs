//! Core scheduling and webhook logic for taskgate.
//!
//! Holds the repository and workload ports (implemented in taskgate-infra),
//! the Task admission state machine, and the webhook-to-Task pipeline.
//! Nothing in here knows which store or execution backend is in use.

pub mod admission;
pub mod controller;
pub mod repository;
pub mod task;
pub mod webhook;
pub mod workload;

#[cfg(test)]
pub(crate) mod testing;
