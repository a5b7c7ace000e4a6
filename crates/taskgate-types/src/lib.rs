//! Shared domain types for taskgate.
//!
//! This crate contains the declarative objects the control plane operates on:
//! Task, Agent, TaskTemplate, WebhookTrigger and Secret, their common object metadata,
//! global configuration, and the error types shared across layers.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod meta;
pub mod secret;
pub mod task;
pub mod template;
pub mod trigger;
