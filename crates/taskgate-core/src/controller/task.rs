//! Drives `TaskReconciler` from store watch events.
//!
//! Task changes enqueue the Task itself. A Task leaving the active set frees
//! capacity, so its Agent's Queued peers are enqueued too. Agent changes
//! (limits raised, Agent created late) enqueue every non-terminal Task that
//! references the Agent. A periodic resync enqueues everything.

use std::sync::Arc;
use std::time::Duration;

use taskgate_types::agent::Agent;
use taskgate_types::meta::{ObjectKey, Resource};
use taskgate_types::task::{Task, TaskPhase};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::queue::WorkQueue;
use crate::admission::tasks_for_agent;
use crate::repository::{
    AgentRepository, ListParams, ObjectRepository, TaskRepository, TemplateRepository, WatchEvent,
};
use crate::task::{ReconcileAction, TaskReconciler};
use crate::workload::WorkloadBackend;

/// Requeue delay after a failed reconcile.
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

pub struct TaskController<T, A, P, W> {
    reconciler: Arc<TaskReconciler<T, A, P, W>>,
    tasks: T,
    agents: A,
    queue: Arc<WorkQueue<ObjectKey>>,
    workers: usize,
    resync: Duration,
}

impl<T, A, P, W> TaskController<T, A, P, W>
where
    T: TaskRepository + Clone + 'static,
    A: AgentRepository + 'static,
    P: TemplateRepository + 'static,
    W: WorkloadBackend + 'static,
{
    pub fn new(
        reconciler: Arc<TaskReconciler<T, A, P, W>>,
        tasks: T,
        agents: A,
        workers: usize,
        resync: Duration,
    ) -> Self {
        Self {
            reconciler,
            tasks,
            agents,
            queue: WorkQueue::new(),
            workers: workers.max(1),
            resync,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    /// Run until `cancel` fires. Workers finish their current key first.
    pub async fn run(self, cancel: CancellationToken) {
        // Subscribe before the initial list so no change falls in between.
        let mut task_events = ObjectRepository::<Task>::watch(&self.tasks);
        let mut agent_events = ObjectRepository::<Agent>::watch(&self.agents);

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            workers.spawn(worker(id, queue, reconciler));
        }

        self.resync_all().await;
        let mut resync = tokio::time::interval(self.resync);
        resync.tick().await;
        tracing::info!(workers = self.workers, "task controller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = task_events.recv() => match event {
                    Ok(event) => self.on_task_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "task watch lagged, resyncing");
                        self.resync_all().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                event = agent_events.recv() => match event {
                    Ok(event) => self.on_agent_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "agent watch lagged, resyncing");
                        self.resync_all().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = resync.tick() => self.resync_all().await,
            }
        }

        self.queue.shutdown();
        while workers.join_next().await.is_some() {}
        tracing::info!("task controller stopped");
    }

    async fn on_task_event(&self, event: WatchEvent<Task>) {
        match event {
            WatchEvent::Applied(task) => {
                self.queue.add(task.key());
                if task.phase().is_terminal() {
                    self.enqueue_queued_peers(&task).await;
                }
            }
            WatchEvent::Deleted(task) => {
                if task.is_active() {
                    self.enqueue_queued_peers(&task).await;
                }
            }
        }
    }

    async fn on_agent_event(&self, event: WatchEvent<Agent>) {
        let agent = event.key();
        match tasks_for_agent(&self.tasks, &agent).await {
            Ok(tasks) => {
                for task in tasks.iter().filter(|t| !t.phase().is_terminal()) {
                    self.queue.add(task.key());
                }
            }
            Err(e) => tracing::warn!(agent = %agent, error = %e, "failed to list tasks for agent"),
        }
    }

    async fn enqueue_queued_peers(&self, task: &Task) {
        let Some(agent) = task.agent_key() else {
            return;
        };
        match tasks_for_agent(&self.tasks, &agent).await {
            Ok(peers) => {
                for peer in peers.iter().filter(|p| p.phase() == TaskPhase::Queued) {
                    self.queue.add(peer.key());
                }
            }
            Err(e) => tracing::warn!(agent = %agent, error = %e, "failed to list queued peers"),
        }
    }

    async fn resync_all(&self) {
        match ObjectRepository::<Task>::list(&self.tasks, &ListParams::all()).await {
            Ok(tasks) => {
                for task in tasks.iter().filter(|t| !t.phase().is_terminal()) {
                    self.queue.add(task.key());
                }
                tracing::debug!(count = tasks.len(), "task resync");
            }
            Err(e) => tracing::warn!(error = %e, "task resync failed"),
        }
    }
}

async fn worker<T, A, P, W>(
    id: usize,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<TaskReconciler<T, A, P, W>>,
) where
    T: TaskRepository + Clone + 'static,
    A: AgentRepository + 'static,
    P: TemplateRepository + 'static,
    W: WorkloadBackend + 'static,
{
    while let Some(key) = queue.next().await {
        let span = tracing::debug_span!("reconcile", worker = id, task = %key);
        match reconciler.reconcile(&key).instrument(span).await {
            Ok(ReconcileAction::Done) => {}
            Ok(ReconcileAction::RequeueAfter(delay)) => queue.add_after(key.clone(), delay),
            Err(e) => {
                tracing::warn!(task = %key, error = %e, "reconcile failed, requeueing");
                queue.add_after(key.clone(), ERROR_REQUEUE);
            }
        }
        queue.done(&key);
    }
}

#[cfg(test)]
mod tests {
    use taskgate_types::agent::AgentSpec;
    use taskgate_types::meta::{ObjectMeta, ObjectRef};
    use taskgate_types::task::{RetryPolicy, TaskSpec};

    use super::*;
    use crate::task::ReconcileTiming;
    use crate::testing::{FakeStore, FakeWorkloads};
    use crate::workload::{WorkloadState, WorkloadStatus};

    fn timing() -> ReconcileTiming {
        ReconcileTiming {
            queued_requeue: Duration::from_millis(20),
            blocked_requeue: Duration::from_millis(20),
            running_poll: Duration::from_millis(20),
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn task(name: &str) -> Task {
        Task::new(
            ObjectMeta::new("default", name),
            TaskSpec {
                description: name.to_string(),
                agent_ref: Some(ObjectRef::new("coder")),
                ..TaskSpec::default()
            },
        )
    }

    fn start(
        store: &Arc<FakeStore>,
        workloads: &Arc<FakeWorkloads>,
    ) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let reconciler = Arc::new(TaskReconciler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            workloads.clone(),
            RetryPolicy::default(),
            timing(),
        ));
        let controller = TaskController::new(
            reconciler,
            store.clone(),
            store.clone(),
            2,
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(controller.run(cancel.clone()));
        (cancel, handle)
    }

    fn phase(store: &FakeStore, name: &str) -> TaskPhase {
        store.task("default", name).phase()
    }

    #[tokio::test]
    async fn test_queued_task_starts_when_capacity_frees() {
        let store = Arc::new(FakeStore::new());
        let workloads = Arc::new(FakeWorkloads::default());
        let agent = Agent {
            metadata: ObjectMeta::new("default", "coder"),
            spec: AgentSpec {
                max_concurrent_tasks: Some(1),
                ..AgentSpec::default()
            },
        };
        ObjectRepository::<Agent>::create(&*store, &agent).await.unwrap();
        ObjectRepository::<Task>::create(&*store, &task("first")).await.unwrap();

        let (cancel, handle) = start(&store, &workloads);
        eventually(|| phase(&store, "first") == TaskPhase::Running).await;

        ObjectRepository::<Task>::create(&*store, &task("second")).await.unwrap();
        eventually(|| phase(&store, "second") == TaskPhase::Queued).await;

        workloads.finish(
            &ObjectKey::new("default", "first-1"),
            WorkloadStatus::new(WorkloadState::Succeeded),
        );
        eventually(|| phase(&store, "first") == TaskPhase::Completed).await;
        eventually(|| phase(&store, "second") == TaskPhase::Running).await;

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_agent_created_late_unblocks_task() {
        let store = Arc::new(FakeStore::new());
        let workloads = Arc::new(FakeWorkloads::default());
        ObjectRepository::<Task>::create(&*store, &task("early")).await.unwrap();

        let (cancel, handle) = start(&store, &workloads);
        eventually(|| store.task("default", "early").status.observed_generation > 0).await;
        assert_eq!(phase(&store, "early"), TaskPhase::Pending);

        let agent = Agent {
            metadata: ObjectMeta::new("default", "coder"),
            spec: AgentSpec::default(),
        };
        ObjectRepository::<Agent>::create(&*store, &agent).await.unwrap();
        eventually(|| phase(&store, "early") == TaskPhase::Running).await;

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_errors_are_retried() {
        let store = Arc::new(FakeStore::new());
        let workloads = Arc::new(FakeWorkloads::default());
        let agent = Agent {
            metadata: ObjectMeta::new("default", "coder"),
            spec: AgentSpec::default(),
        };
        ObjectRepository::<Agent>::create(&*store, &agent).await.unwrap();
        store
            .fail_status_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        ObjectRepository::<Task>::create(&*store, &task("flaky")).await.unwrap();

        let (cancel, handle) = start(&store, &workloads);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(phase(&store, "flaky"), TaskPhase::Pending);

        store
            .fail_status_writes
            .store(false, std::sync::atomic::Ordering::SeqCst);
        // Error requeue is 5s; nudge the task so the test stays fast.
        let mut touched = store.task("default", "flaky");
        touched.metadata.labels.insert("nudge".to_string(), "1".to_string());
        ObjectRepository::<Task>::update(&*store, &touched).await.unwrap();
        eventually(|| phase(&store, "flaky") == TaskPhase::Running).await;

        cancel.cancel();
        handle.await.unwrap();
    }
}
