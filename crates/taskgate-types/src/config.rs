//! Global configuration types for taskgate.
//!
//! `GlobalConfig` represents the top-level `taskgate.toml` that controls the
//! webhook server, the reconciliation controller, and the default retry
//! policy. Every field has a default so an empty file is valid.

use serde::{Deserialize, Serialize};

use crate::task::RetryPolicy;

/// Default cap on webhook request bodies (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Retry policy applied to Tasks that do not carry their own.
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Externally reachable base URL used to publish `status.webhook_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
            public_base_url: None,
        }
    }
}

impl ServerConfig {
    /// Base URL for published webhook endpoints.
    pub fn base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Interval at which every object is re-enqueued.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    /// Requeue delay for Tasks waiting on capacity or quota.
    #[serde(default = "default_queued_requeue_secs")]
    pub queued_requeue_secs: u64,
    /// Requeue delay for Tasks blocked on a missing Agent/Template.
    #[serde(default = "default_blocked_requeue_secs")]
    pub blocked_requeue_secs: u64,
    /// Poll interval for Running Tasks' workload status.
    #[serde(default = "default_running_poll_secs")]
    pub running_poll_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_queued_requeue_secs() -> u64 {
    10
}

fn default_blocked_requeue_secs() -> u64 {
    30
}

fn default_running_poll_secs() -> u64 {
    15
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resync_interval_secs: default_resync_interval_secs(),
            queued_requeue_secs: default_queued_requeue_secs(),
            blocked_requeue_secs: default_blocked_requeue_secs(),
            running_poll_secs: default_running_poll_secs(),
        }
    }
}
