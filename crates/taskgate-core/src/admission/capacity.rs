//! Concurrency capacity per Agent.

use taskgate_types::agent::Agent;
use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{ObjectKey, Resource};
use taskgate_types::task::{Task, TaskPhase};

use super::{tasks_for_agent, Headroom};
use crate::repository::TaskRepository;

/// Number of `Running` tasks counted against `agent`.
pub fn count_running(agent: &ObjectKey, tasks: &[Task]) -> usize {
    tasks
        .iter()
        .filter(|t| t.phase() == TaskPhase::Running)
        .filter(|t| t.agent_key().as_ref() == Some(agent))
        .count()
}

pub fn remaining_capacity(agent: &Agent, tasks: &[Task]) -> Headroom {
    Headroom::from_usage(
        agent.spec.max_concurrent_tasks,
        count_running(&agent.key(), tasks),
    )
}

/// Computes free concurrency slots from a fresh store query.
pub struct CapacityTracker<T> {
    tasks: T,
}

impl<T: TaskRepository> CapacityTracker<T> {
    pub fn new(tasks: T) -> Self {
        Self { tasks }
    }

    pub async fn remaining(&self, agent: &Agent) -> Result<Headroom, RepositoryError> {
        if agent.spec.max_concurrent_tasks.is_none() {
            return Ok(Headroom::Unlimited);
        }
        let tasks = tasks_for_agent(&self.tasks, &agent.key()).await?;
        Ok(remaining_capacity(agent, &tasks))
    }
}
