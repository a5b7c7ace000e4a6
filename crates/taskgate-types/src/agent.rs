//! Agent domain types.
//!
//! An Agent is the execution profile a Task runs under, together with the
//! admission policy (concurrency cap and start-rate quota) that gates it.

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// Wildcard entry in `allowed_namespaces` admitting Tasks from any namespace.
pub const ANY_NAMESPACE: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub metadata: ObjectMeta,
    pub spec: AgentSpec,
}

impl Resource for Agent {
    const KIND: &'static str = "Agent";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Agent {
    /// Whether Tasks in `namespace` may reference this Agent.
    ///
    /// An empty allow-list admits only the Agent's own namespace.
    pub fn allows_namespace(&self, namespace: &str) -> bool {
        if namespace == self.metadata.namespace {
            return true;
        }
        self.spec
            .allowed_namespaces
            .iter()
            .any(|ns| ns == ANY_NAMESPACE || ns == namespace)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Image running the agent.
    pub image: String,
    /// Optional image for the executor sidecar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_image: Option<String>,
    /// Maximum number of concurrently Running tasks (None = unlimited).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<u32>,
    /// Sliding-window limit on task starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<AgentQuota>,
    /// Namespaces (besides the Agent's own) whose Tasks may use this Agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_namespaces: Vec<String>,
}

/// Sliding-window rate limit on task starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentQuota {
    pub max_task_starts: u32,
    pub window_seconds: u64,
}
