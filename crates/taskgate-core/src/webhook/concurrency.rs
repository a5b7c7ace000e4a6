//! Concurrency policy enforcement for webhook-created Tasks.

use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{Resource, LABEL_WEBHOOK_RULE, LABEL_WEBHOOK_TRIGGER};
use taskgate_types::task::Task;
use taskgate_types::trigger::ConcurrencyPolicy;

use crate::repository::{ListParams, TaskRepository};
use crate::task::stop::request_stop;

/// Finds the non-terminal Tasks a trigger (or one of its rules) created.
///
/// Always a fresh store query; a Task with no phase yet counts as active.
pub struct ActiveTaskQuery<T> {
    tasks: T,
}

impl<T: TaskRepository> ActiveTaskQuery<T> {
    pub fn new(tasks: T) -> Self {
        Self { tasks }
    }

    pub async fn active_tasks(
        &self,
        namespace: &str,
        trigger: &str,
        rule: Option<&str>,
    ) -> Result<Vec<Task>, RepositoryError> {
        let mut params = ListParams::in_namespace(namespace).with_label(LABEL_WEBHOOK_TRIGGER, trigger);
        if let Some(rule) = rule {
            params = params.with_label(LABEL_WEBHOOK_RULE, rule);
        }
        let tasks = self.tasks.list(&params).await?;
        Ok(tasks.into_iter().filter(Task::is_active).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Go ahead and create the Task.
    Proceed,
    /// `Forbid` with an active Task: create nothing.
    Skip,
}

pub struct ConcurrencyEnforcer<T> {
    tasks: T,
    query: ActiveTaskQuery<T>,
}

impl<T: TaskRepository + Clone> ConcurrencyEnforcer<T> {
    pub fn new(tasks: T) -> Self {
        Self {
            query: ActiveTaskQuery::new(tasks.clone()),
            tasks,
        }
    }

    /// Apply `policy` to the trigger's (or rule's) currently active Tasks.
    ///
    /// `Replace` marks every active Task for stop and proceeds without
    /// waiting; a Task that cannot be marked is logged and skipped.
    pub async fn enforce(
        &self,
        policy: ConcurrencyPolicy,
        namespace: &str,
        trigger: &str,
        rule: Option<&str>,
    ) -> Result<PolicyOutcome, RepositoryError> {
        match policy {
            ConcurrencyPolicy::Allow => Ok(PolicyOutcome::Proceed),
            ConcurrencyPolicy::Forbid => {
                let active = self.query.active_tasks(namespace, trigger, rule).await?;
                if active.is_empty() {
                    Ok(PolicyOutcome::Proceed)
                } else {
                    tracing::info!(
                        trigger,
                        rule,
                        active = active.len(),
                        "concurrency policy Forbid: skipping"
                    );
                    Ok(PolicyOutcome::Skip)
                }
            }
            ConcurrencyPolicy::Replace => {
                let active = self.query.active_tasks(namespace, trigger, rule).await?;
                for task in &active {
                    let key = task.key();
                    if let Err(e) = request_stop(&self.tasks, &key).await {
                        tracing::warn!(task = %key, error = %e, "failed to stop task for Replace policy");
                    }
                }
                Ok(PolicyOutcome::Proceed)
            }
        }
    }
}
