//! Task admission and scheduling state machine.
//!
//! `TaskReconciler::reconcile` is level-triggered: it reads the Task afresh,
//! compares desired and observed state, performs at most one transition and
//! tells the caller when to look again. Transient store or backend errors are
//! returned as `ReconcileError` and retried by requeueing; they never fail a
//! Task.
//!
//! Transitions:
//! - `Pending|Queued -> Running` when the Agent has capacity and quota and no
//!   older eligible Queued task of the same Agent is waiting.
//! - `Pending -> Queued` when capacity or quota is exhausted.
//! - `Running -> Completed|Failed` when the workload terminates.
//! - `Running -> Queued` for a retry-eligible failure with attempts left.
//! - any active phase `-> Completed` when a stop is requested.

use std::time::Duration;

use chrono::{DateTime, Utc};
use taskgate_types::agent::Agent;
use taskgate_types::config::ControllerConfig;
use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{ObjectKey, Resource};
use taskgate_types::task::{
    condition_type, reason, Condition, ConditionStatus, OutputSpec, RetryPolicy, Task, TaskPhase,
    TaskSpec, TaskStatus, TerminalReason,
};

use super::retry::{RetryDecision, RetryHandler};
use super::terminal::classify_termination;
use crate::admission::{queued_ahead, tasks_for_agent, CapacityTracker, QuotaTracker};
use crate::repository::{AgentRepository, TaskRepository, TemplateRepository};
use crate::workload::{
    ContainerTermination, WorkloadBackend, WorkloadError, WorkloadSpec, WorkloadState,
};

/// Smallest requeue delay handed back to the controller.
const MIN_REQUEUE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Outcome and error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing further to do until the object changes.
    Done,
    /// Reconcile the same key again after the delay.
    RequeueAfter(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error("task {task}: refusing phase transition {from} -> {to}")]
    InvalidTransition {
        task: ObjectKey,
        from: TaskPhase,
        to: TaskPhase,
    },
}

/// Requeue intervals used by the reconciler.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileTiming {
    /// Re-check of a task waiting on capacity or quota.
    pub queued_requeue: Duration,
    /// Re-check of a task blocked on a missing or disallowed dependency.
    pub blocked_requeue: Duration,
    /// Poll interval for a running workload.
    pub running_poll: Duration,
}

impl ReconcileTiming {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            queued_requeue: Duration::from_secs(config.queued_requeue_secs),
            blocked_requeue: Duration::from_secs(config.blocked_requeue_secs),
            running_poll: Duration::from_secs(config.running_poll_secs),
        }
    }
}

impl Default for ReconcileTiming {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

/// Agent and merged spec a task will run with.
struct Resolved {
    agent: Agent,
    spec: TaskSpec,
}

/// A dependency problem that keeps the task where it is.
struct Blocked {
    reason: &'static str,
    message: String,
}

// ---------------------------------------------------------------------------
// TaskReconciler
// ---------------------------------------------------------------------------

pub struct TaskReconciler<T, A, P, W> {
    tasks: T,
    agents: A,
    templates: P,
    workloads: W,
    capacity: CapacityTracker<T>,
    quota: QuotaTracker<T>,
    retry_policy: RetryPolicy,
    timing: ReconcileTiming,
}

impl<T, A, P, W> TaskReconciler<T, A, P, W>
where
    T: TaskRepository + Clone,
    A: AgentRepository,
    P: TemplateRepository,
    W: WorkloadBackend,
{
    /// `retry_policy` applies to tasks that do not carry their own.
    pub fn new(
        tasks: T,
        agents: A,
        templates: P,
        workloads: W,
        retry_policy: RetryPolicy,
        timing: ReconcileTiming,
    ) -> Self {
        Self {
            capacity: CapacityTracker::new(tasks.clone()),
            quota: QuotaTracker::new(tasks.clone()),
            tasks,
            agents,
            templates,
            workloads,
            retry_policy,
            timing,
        }
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileAction, ReconcileError> {
        let Some(task) = self.tasks.get(key).await? else {
            tracing::debug!(task = %key, "task gone, nothing to reconcile");
            return Ok(ReconcileAction::Done);
        };

        let phase = task.phase();
        if phase.is_terminal() {
            return Ok(ReconcileAction::Done);
        }
        if task.stop_requested() {
            return self.stop(task).await;
        }
        match phase {
            TaskPhase::Running => self.observe(task).await,
            _ => self.admit(task).await,
        }
    }

    // -- admission ----------------------------------------------------------

    async fn admit(&self, task: Task) -> Result<ReconcileAction, ReconcileError> {
        let now = Utc::now();
        if let Some(at) = task.status.retry_after {
            if at > now {
                return Ok(ReconcileAction::RequeueAfter(until(now, at)));
            }
        }

        let resolved = match self.resolve(&task).await? {
            Ok(resolved) => resolved,
            Err(blocked) => return self.block(task, blocked).await,
        };
        let agent_key = resolved.agent.key();

        let peers = tasks_for_agent(&self.tasks, &agent_key).await?;
        let ahead = queued_ahead(&task, &peers, now);

        let capacity = self.capacity.remaining(&resolved.agent).await?;
        if !capacity.exceeds(ahead) {
            let message = format!(
                "agent {agent_key} has no free slot (limit {}, {ahead} queued ahead)",
                resolved.agent.spec.max_concurrent_tasks.unwrap_or_default()
            );
            return self
                .enqueue(task, agent_key, reason::AGENT_AT_CAPACITY, message, self.timing.queued_requeue)
                .await;
        }

        let quota = self.quota.check(&resolved.agent, now).await?;
        if !quota.remaining.exceeds(ahead) {
            let requeue = quota
                .next_expiry
                .map(|at| until(now, at))
                .unwrap_or(self.timing.queued_requeue);
            let message = format!("agent {agent_key} start quota exhausted ({ahead} queued ahead)");
            return self
                .enqueue(task, agent_key, reason::QUOTA_EXCEEDED, message, requeue)
                .await;
        }

        self.start(task, resolved, now).await
    }

    /// Look up template and agent. The outer error is transient; the inner
    /// one describes a dependency problem to surface on the task.
    async fn resolve(&self, task: &Task) -> Result<Result<Resolved, Blocked>, ReconcileError> {
        let namespace = &task.metadata.namespace;

        let spec = match &task.spec.template_ref {
            Some(template_ref) => {
                let key = template_ref.resolve(namespace);
                match self.templates.get(&key).await? {
                    Some(template) => template.spec.merge_into(&task.spec),
                    None => {
                        return Ok(Err(Blocked {
                            reason: reason::TEMPLATE_NOT_FOUND,
                            message: format!("task template {key} not found"),
                        }));
                    }
                }
            }
            None => task.spec.clone(),
        };

        let Some(agent_ref) = &spec.agent_ref else {
            return Ok(Err(Blocked {
                reason: reason::AGENT_NOT_SPECIFIED,
                message: "neither the task nor its template names an agent".to_string(),
            }));
        };
        let agent_key = agent_ref.resolve(namespace);
        let Some(agent) = self.agents.get(&agent_key).await? else {
            return Ok(Err(Blocked {
                reason: reason::AGENT_NOT_FOUND,
                message: format!("agent {agent_key} not found"),
            }));
        };
        if !agent.allows_namespace(namespace) {
            return Ok(Err(Blocked {
                reason: reason::NAMESPACE_NOT_ALLOWED,
                message: format!("agent {agent_key} does not accept tasks from namespace {namespace}"),
            }));
        }

        Ok(Ok(Resolved { agent, spec }))
    }

    async fn block(&self, task: Task, blocked: Blocked) -> Result<ReconcileAction, ReconcileError> {
        tracing::info!(
            task = %task.key(),
            reason = blocked.reason,
            message = %blocked.message,
            "task blocked"
        );
        let phase = task.phase();
        self.write_status(task, |status| {
            status.phase = Some(phase);
            status.set_condition(Condition::new(
                condition_type::READY,
                ConditionStatus::False,
                blocked.reason,
                blocked.message,
            ));
        })
        .await?;
        Ok(ReconcileAction::RequeueAfter(self.timing.blocked_requeue))
    }

    async fn enqueue(
        &self,
        task: Task,
        agent: ObjectKey,
        why: &'static str,
        message: String,
        requeue: Duration,
    ) -> Result<ReconcileAction, ReconcileError> {
        self.write_status(task, |status| {
            status.phase = Some(TaskPhase::Queued);
            status.agent = Some(agent);
            status.set_condition(Condition::new(
                condition_type::QUEUED,
                ConditionStatus::True,
                why,
                message.clone(),
            ));
            status.set_condition(Condition::new(
                condition_type::READY,
                ConditionStatus::False,
                why,
                message,
            ));
        })
        .await?;
        Ok(ReconcileAction::RequeueAfter(requeue.max(MIN_REQUEUE)))
    }

    async fn start(
        &self,
        task: Task,
        resolved: Resolved,
        now: DateTime<Utc>,
    ) -> Result<ReconcileAction, ReconcileError> {
        let task_key = task.key();
        let attempt = task.status.attempts + 1;
        let workload_key = ObjectKey::new(
            &task.metadata.namespace,
            WorkloadSpec::name_for(&task_key, attempt),
        );
        if task.status.attempts > 0 {
            let previous = ObjectKey::new(
                &task.metadata.namespace,
                WorkloadSpec::name_for(&task_key, task.status.attempts),
            );
            self.workloads.delete(&previous).await?;
        }
        let agent_key = resolved.agent.key();
        let spec = WorkloadSpec {
            key: workload_key.clone(),
            task: task_key.clone(),
            task_spec: resolved.spec,
            agent: resolved.agent,
            attempt,
        };

        match self.workloads.create(&spec).await {
            Ok(()) => {}
            Err(WorkloadError::Rejected(message)) => {
                let blocked = Blocked {
                    reason: reason::WORKLOAD_CREATE_FAILED,
                    message,
                };
                return self.block(task, blocked).await;
            }
            Err(e) => return Err(e.into()),
        }

        self.write_status(task, |status| {
            status.phase = Some(TaskPhase::Running);
            status.agent = Some(agent_key.clone());
            status.workload_name = Some(workload_key.name.clone());
            status.workload_namespace = Some(workload_key.namespace.clone());
            status.start_time = Some(now);
            status.attempts = attempt;
            status.retry_after = None;
            status.remove_condition(condition_type::QUEUED);
            status.set_condition(Condition::new(
                condition_type::READY,
                ConditionStatus::True,
                reason::WORKLOAD_RUNNING,
                format!("workload {workload_key} started"),
            ));
        })
        .await?;

        tracing::info!(
            task = %task_key,
            agent = %agent_key,
            workload = %workload_key,
            attempt,
            "task admitted"
        );
        Ok(ReconcileAction::RequeueAfter(self.timing.running_poll))
    }

    // -- running ------------------------------------------------------------

    async fn observe(&self, task: Task) -> Result<ReconcileAction, ReconcileError> {
        let Some(workload) = workload_key(&task) else {
            return self
                .fail(task, TerminalReason::Unknown, None, "no workload recorded for running task")
                .await;
        };

        let Some(observed) = self.workloads.status(&workload).await? else {
            tracing::warn!(task = %task.key(), workload = %workload, "workload disappeared");
            return self
                .fail(task, classify_termination(None), None, "workload disappeared")
                .await;
        };

        match observed.state {
            WorkloadState::Pending | WorkloadState::Running => {
                Ok(ReconcileAction::RequeueAfter(self.timing.running_poll))
            }
            WorkloadState::Succeeded => {
                let mut outputs = observed.outputs;
                for output in &self.declared_outputs(&task).await? {
                    if let Some(default) = &output.default {
                        outputs
                            .entry(output.name.clone())
                            .or_insert_with(|| default.clone());
                    }
                }
                self.write_status(task, |status| {
                    status.phase = Some(TaskPhase::Completed);
                    status.completion_time = Some(Utc::now());
                    status.outputs = outputs;
                    status.set_condition(Condition::new(
                        condition_type::READY,
                        ConditionStatus::False,
                        reason::SUCCEEDED,
                        "task completed",
                    ));
                })
                .await?;
                Ok(ReconcileAction::Done)
            }
            WorkloadState::Failed => self.handle_failure(task, &workload, observed.container).await,
        }
    }

    /// Outputs the task ran with: its own merged over its template's. A
    /// template deleted since admission leaves only the task's own.
    async fn declared_outputs(&self, task: &Task) -> Result<Vec<OutputSpec>, ReconcileError> {
        let Some(template_ref) = &task.spec.template_ref else {
            return Ok(task.spec.outputs.clone());
        };
        let key = template_ref.resolve(&task.metadata.namespace);
        Ok(match self.templates.get(&key).await? {
            Some(template) => template.spec.merge_into(&task.spec).outputs,
            None => task.spec.outputs.clone(),
        })
    }

    async fn handle_failure(
        &self,
        task: Task,
        workload: &ObjectKey,
        container: Option<ContainerTermination>,
    ) -> Result<ReconcileAction, ReconcileError> {
        let terminal = classify_termination(container.as_ref());
        let policy = task.spec.retry_policy.unwrap_or(self.retry_policy);
        let attempts = task.status.attempts;

        match RetryHandler::decide(&policy, terminal, attempts) {
            RetryDecision::Retry { delay } => {
                let retry_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let message = format!(
                    "attempt {attempts} of {} failed ({terminal}); retrying in {}s",
                    policy.max_attempts,
                    delay.as_secs()
                );
                let task_key = task.key();
                tracing::warn!(task = %task_key, attempts, delay_secs = delay.as_secs(), "retrying task");
                // Queued is persisted first: until it is, the failed workload
                // must stay observable so the next pass retries again.
                self.write_status(task, |status| {
                    status.phase = Some(TaskPhase::Queued);
                    status.retry_after = Some(retry_at);
                    status.workload_name = None;
                    status.workload_namespace = None;
                    status.set_condition(Condition::new(
                        condition_type::QUEUED,
                        ConditionStatus::True,
                        reason::RETRY_BACKOFF,
                        message.clone(),
                    ));
                    status.set_condition(Condition::new(
                        condition_type::READY,
                        ConditionStatus::False,
                        reason::RETRY_BACKOFF,
                        message,
                    ));
                })
                .await?;
                if let Err(e) = self.workloads.delete(workload).await {
                    // The next admission removes it before starting again.
                    tracing::warn!(task = %task_key, workload = %workload, error = %e, "failed to delete workload");
                }
                Ok(ReconcileAction::RequeueAfter(delay.max(MIN_REQUEUE)))
            }
            RetryDecision::GiveUp => {
                let message = container
                    .as_ref()
                    .and_then(|c| c.message.clone())
                    .unwrap_or_else(|| format!("workload failed ({terminal})"));
                self.fail(task, terminal, container, &message).await
            }
        }
    }

    async fn fail(
        &self,
        task: Task,
        terminal: TerminalReason,
        container: Option<ContainerTermination>,
        message: &str,
    ) -> Result<ReconcileAction, ReconcileError> {
        tracing::warn!(task = %task.key(), reason = %terminal, message, "task failed");
        self.write_status(task, |status| {
            status.phase = Some(TaskPhase::Failed);
            status.completion_time = Some(Utc::now());
            status.terminal_reason = Some(terminal);
            status.exit_code = container.map(|c| c.exit_code);
            status.set_condition(Condition::new(
                condition_type::READY,
                ConditionStatus::False,
                terminal.as_str(),
                message,
            ));
        })
        .await?;
        Ok(ReconcileAction::Done)
    }

    // -- stop ---------------------------------------------------------------

    async fn stop(&self, task: Task) -> Result<ReconcileAction, ReconcileError> {
        if let Some(workload) = workload_key(&task) {
            self.workloads.delete(&workload).await?;
        }
        tracing::info!(task = %task.key(), phase = %task.phase(), "task stopped on request");
        self.write_status(task, |status| {
            status.phase = Some(TaskPhase::Completed);
            status.completion_time = Some(Utc::now());
            status.retry_after = None;
            status.set_condition(Condition::new(
                condition_type::STOPPED,
                ConditionStatus::True,
                reason::USER_STOPPED,
                "stopped on request",
            ));
            status.set_condition(Condition::new(
                condition_type::READY,
                ConditionStatus::False,
                reason::USER_STOPPED,
                "stopped on request",
            ));
        })
        .await?;
        Ok(ReconcileAction::Done)
    }

    // -- status -------------------------------------------------------------

    /// Apply `mutate` and persist. Unchanged status is not written.
    async fn write_status(
        &self,
        mut task: Task,
        mutate: impl FnOnce(&mut TaskStatus),
    ) -> Result<Task, ReconcileError> {
        let before = task.status.clone();
        let from = task.phase();
        mutate(&mut task.status);
        let to = task.phase();

        if !from.can_transition_to(to) {
            return Err(ReconcileError::InvalidTransition {
                task: task.key(),
                from,
                to,
            });
        }
        task.status.observed_generation = task.metadata.generation;
        if task.status == before {
            return Ok(task);
        }

        let stored = self.tasks.update_status(&task).await?;
        if from != to || before.phase.is_none() {
            tracing::info!(task = %stored.key(), from = %from, to = %to, "task phase changed");
        }
        Ok(stored)
    }
}

fn workload_key(task: &Task) -> Option<ObjectKey> {
    let name = task.status.workload_name.as_ref()?;
    let namespace = task
        .status
        .workload_namespace
        .as_deref()
        .unwrap_or(&task.metadata.namespace);
    Some(ObjectKey::new(namespace, name))
}

fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO).max(MIN_REQUEUE)
}
