//! Workload backend port.
//!
//! A workload is the execution unit (a Pod in a cluster deployment) that runs
//! an agent for one attempt of a Task. The reconciler creates, observes and
//! deletes workloads through this trait only.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use taskgate_types::agent::Agent;
use taskgate_types::meta::ObjectKey;
use taskgate_types::task::TaskSpec;

/// Everything needed to materialize one attempt of a Task.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub key: ObjectKey,
    pub task: ObjectKey,
    /// Task spec after template merge.
    pub task_spec: TaskSpec,
    pub agent: Agent,
    pub attempt: u32,
}

impl WorkloadSpec {
    /// Workload name for a given attempt. Stable, so a retried create after a
    /// failed status write finds the workload it already made.
    pub fn name_for(task: &ObjectKey, attempt: u32) -> String {
        format!("{}-{}", task.name, attempt)
    }
}

/// Observed lifecycle state of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Final state of the agent container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerTermination {
    pub exit_code: i32,
    /// Runtime-reported reason, e.g. `Error`, `OOMKilled`, `Completed`.
    pub reason: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub state: WorkloadState,
    /// Last terminated state of the agent container, when known.
    pub container: Option<ContainerTermination>,
    /// Output parameters reported by the agent.
    pub outputs: BTreeMap<String, String>,
}

impl WorkloadStatus {
    pub fn new(state: WorkloadState) -> Self {
        Self {
            state,
            container: None,
            outputs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkloadError {
    /// The backend refused the workload. Not retried by requeue.
    #[error("workload rejected: {0}")]
    Rejected(String),

    #[error("workload backend unavailable: {0}")]
    Unavailable(String),
}

/// Execution backend contract.
pub trait WorkloadBackend: Send + Sync {
    /// Create the workload. Creating a name that already exists succeeds.
    fn create(&self, spec: &WorkloadSpec) -> impl Future<Output = Result<(), WorkloadError>> + Send;

    /// `Ok(None)` when no such workload exists.
    fn status(
        &self,
        key: &ObjectKey,
    ) -> impl Future<Output = Result<Option<WorkloadStatus>, WorkloadError>> + Send;

    /// Deleting a missing workload succeeds.
    fn delete(&self, key: &ObjectKey) -> impl Future<Output = Result<(), WorkloadError>> + Send;
}

impl<T: WorkloadBackend> WorkloadBackend for Arc<T> {
    fn create(&self, spec: &WorkloadSpec) -> impl Future<Output = Result<(), WorkloadError>> + Send {
        (**self).create(spec)
    }

    fn status(
        &self,
        key: &ObjectKey,
    ) -> impl Future<Output = Result<Option<WorkloadStatus>, WorkloadError>> + Send {
        (**self).status(key)
    }

    fn delete(&self, key: &ObjectKey) -> impl Future<Output = Result<(), WorkloadError>> + Send {
        (**self).delete(key)
    }
}
