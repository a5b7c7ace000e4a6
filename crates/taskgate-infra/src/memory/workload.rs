//! In-memory workload backend.
//!
//! Workloads start `Running` and stay there until `finish` is called, or,
//! when a simulated runtime is configured, until that much time has passed,
//! after which they report success.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use taskgate_core::workload::{
    ContainerTermination, WorkloadBackend, WorkloadError, WorkloadSpec, WorkloadState,
    WorkloadStatus,
};
use taskgate_types::meta::ObjectKey;
use tokio::time::Instant;

struct Record {
    spec: WorkloadSpec,
    started: Instant,
    status: WorkloadStatus,
}

#[derive(Default)]
pub struct MemoryWorkloads {
    workloads: DashMap<ObjectKey, Record>,
    simulated_runtime: Option<Duration>,
}

impl MemoryWorkloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workloads succeed on their own once `runtime` has elapsed.
    pub fn with_simulated_runtime(runtime: Duration) -> Self {
        Self {
            workloads: DashMap::new(),
            simulated_runtime: Some(runtime),
        }
    }

    /// Force a workload into a final (or any) state.
    pub fn finish(&self, key: &ObjectKey, status: WorkloadStatus) -> bool {
        match self.workloads.get_mut(key) {
            Some(mut record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    /// Drop a workload without the owner's involvement, as a node loss would.
    pub fn evict(&self, key: &ObjectKey) -> bool {
        self.workloads.remove(key).is_some()
    }

    pub fn spec(&self, key: &ObjectKey) -> Option<WorkloadSpec> {
        self.workloads.get(key).map(|r| r.spec.clone())
    }

    /// Keys of workloads currently `Pending` or `Running`.
    pub fn running(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<ObjectKey> = self
            .workloads
            .iter()
            .filter(|r| matches!(r.status.state, WorkloadState::Pending | WorkloadState::Running))
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

fn simulated_success() -> WorkloadStatus {
    WorkloadStatus {
        state: WorkloadState::Succeeded,
        container: Some(ContainerTermination {
            exit_code: 0,
            reason: "Completed".to_string(),
            message: None,
        }),
        outputs: BTreeMap::new(),
    }
}

impl WorkloadBackend for MemoryWorkloads {
    async fn create(&self, spec: &WorkloadSpec) -> Result<(), WorkloadError> {
        if spec.agent.spec.image.trim().is_empty() {
            return Err(WorkloadError::Rejected(format!(
                "agent {} has no image",
                spec.agent.metadata.name
            )));
        }
        let inserted = !self.workloads.contains_key(&spec.key);
        self.workloads.entry(spec.key.clone()).or_insert_with(|| Record {
            spec: spec.clone(),
            started: Instant::now(),
            status: WorkloadStatus::new(WorkloadState::Running),
        });
        if inserted {
            tracing::debug!(workload = %spec.key, task = %spec.task, attempt = spec.attempt, "workload created");
        }
        Ok(())
    }

    async fn status(&self, key: &ObjectKey) -> Result<Option<WorkloadStatus>, WorkloadError> {
        let Some(mut record) = self.workloads.get_mut(key) else {
            return Ok(None);
        };
        if let Some(runtime) = self.simulated_runtime {
            if record.status.state == WorkloadState::Running && record.started.elapsed() >= runtime {
                record.status = simulated_success();
            }
        }
        Ok(Some(record.status.clone()))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), WorkloadError> {
        if self.workloads.remove(key).is_some() {
            tracing::debug!(workload = %key, "workload deleted");
        }
        Ok(())
    }
}
