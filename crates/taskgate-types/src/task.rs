//! Task domain types.
//!
//! A Task is a unit of agent work with a phase-based lifecycle:
//! `Pending -> {Queued <-> Running} -> {Completed | Failed}`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{HasStatus, ObjectKey, ObjectMeta, ObjectRef, Resource, ANNOTATION_STOP};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub metadata: ObjectMeta,
    pub spec: TaskSpec,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    pub fn new(metadata: ObjectMeta, spec: TaskSpec) -> Self {
        Self {
            metadata,
            spec,
            status: TaskStatus::default(),
        }
    }

    /// A task is active until it reaches a terminal phase. A freshly created
    /// task with no phase yet counts as active.
    pub fn is_active(&self) -> bool {
        !self.status.phase.is_some_and(TaskPhase::is_terminal)
    }

    /// Whether the stop annotation is present and set to `"true"`.
    pub fn stop_requested(&self) -> bool {
        self.metadata
            .annotations
            .get(ANNOTATION_STOP)
            .is_some_and(|v| v == "true")
    }

    /// Phase as seen by the scheduler (`Pending` until first reconcile).
    pub fn phase(&self) -> TaskPhase {
        self.status.phase.unwrap_or(TaskPhase::Pending)
    }

    /// The Agent this task counts against: the one recorded at admission,
    /// else `spec.agent_ref`.
    pub fn agent_key(&self) -> Option<ObjectKey> {
        self.status.agent.clone().or_else(|| {
            self.spec
                .agent_ref
                .as_ref()
                .map(|r| r.resolve(&self.metadata.namespace))
        })
    }
}

impl Resource for Task {
    const KIND: &'static str = "Task";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl HasStatus for Task {
    type Status = TaskStatus;

    fn status(&self) -> &TaskStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut TaskStatus {
        &mut self.status
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// The instruction handed to the agent.
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ref: Option<ObjectRef>,
    /// Ordered context items made available to the agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<ContextItem>,
    /// Output parameters the agent is expected to produce.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<ObjectRef>,
    /// Overrides the controller-wide retry policy for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

/// A single context item passed to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: ContextKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    #[default]
    Text,
    File,
    Url,
}

/// Declares an output parameter the agent run should report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// `None` until the scheduler has observed the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<TaskPhase>,
    /// Agent resolved at admission (after template merge).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: u64,
    /// Number of times the task has been started.
    #[serde(default)]
    pub attempts: u32,
    /// Earliest instant a retry may be re-admitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<TerminalReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl TaskStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace the condition of the same type.
    ///
    /// `last_transition_time` is preserved when the status value does not change.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    pub fn remove_condition(&mut self, type_: &str) {
        self.conditions.retain(|c| c.type_ != type_);
    }
}

/// Lifecycle phase of a Task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPhase {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle graph.
    ///
    /// Self-transitions are allowed (status refreshes); terminal phases are
    /// immutable.
    pub fn can_transition_to(self, next: TaskPhase) -> bool {
        use TaskPhase::*;
        if self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Queued | Running | Completed | Failed),
            Queued => matches!(next, Running | Completed | Failed),
            Running => matches!(next, Queued | Completed | Failed),
            Completed | Failed => false,
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPhase::Pending => "Pending",
            TaskPhase::Queued => "Queued",
            TaskPhase::Running => "Running",
            TaskPhase::Completed => "Completed",
            TaskPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Condition types written by the scheduler.
pub mod condition_type {
    pub const READY: &str = "Ready";
    pub const QUEUED: &str = "Queued";
    pub const STOPPED: &str = "Stopped";
}

/// Condition reasons written by the scheduler.
pub mod reason {
    pub const AGENT_AT_CAPACITY: &str = "AgentAtCapacity";
    pub const QUOTA_EXCEEDED: &str = "QuotaExceeded";
    pub const RETRY_BACKOFF: &str = "RetryBackoff";
    pub const AGENT_NOT_FOUND: &str = "AgentNotFound";
    pub const AGENT_NOT_SPECIFIED: &str = "AgentNotSpecified";
    pub const TEMPLATE_NOT_FOUND: &str = "TemplateNotFound";
    pub const NAMESPACE_NOT_ALLOWED: &str = "NamespaceNotAllowed";
    pub const WORKLOAD_CREATE_FAILED: &str = "WorkloadCreateFailed";
    pub const WORKLOAD_RUNNING: &str = "WorkloadRunning";
    pub const SUCCEEDED: &str = "Succeeded";
    pub const USER_STOPPED: &str = "UserStopped";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// Classification of why a task's workload terminated unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalReason {
    /// The platform killed or lost the workload (e.g. OOM). Retry-eligible.
    InfrastructureError,
    /// The agent process exited with a non-zero code.
    AgentExitNonZero,
    /// Anything that could not be classified. Treated as non-retryable.
    Unknown,
}

impl TerminalReason {
    pub fn is_retryable(self) -> bool {
        matches!(self, TerminalReason::InfrastructureError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TerminalReason::InfrastructureError => "InfrastructureError",
            TerminalReason::AgentExitNonZero => "AgentExitNonZero",
            TerminalReason::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry policy for retry-eligible task failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of starts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffProfile,
    /// Upper bound on a single retry delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffProfile::default(),
            max_delay_secs: None,
        }
    }
}

/// Shape of the delay between retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffProfile {
    #[default]
    Linear,
    Exponential,
}
