//! Keeps the webhook registry and WebhookTrigger status in step with the
//! store.
//!
//! Trigger events are handled serially by one loop, so the registry never
//! sees interleaved registrations for the same key. Status sync publishes the
//! webhook URL and prunes finished Tasks from the active lists.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{ObjectKey, Resource, LABEL_WEBHOOK_TRIGGER};
use taskgate_types::task::Task;
use taskgate_types::trigger::{WebhookTrigger, WebhookTriggerStatus};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::repository::{ListParams, ObjectRepository, StatusRepository, TaskRepository, TriggerRepository, WatchEvent};
use crate::webhook::{TriggerRegistry, WEBHOOK_PATH_PREFIX};

pub struct TriggerController<G, T> {
    registry: Arc<TriggerRegistry>,
    triggers: G,
    tasks: T,
    base_url: String,
    resync: Duration,
}

impl<G, T> TriggerController<G, T>
where
    G: TriggerRepository,
    T: TaskRepository,
{
    pub fn new(
        registry: Arc<TriggerRegistry>,
        triggers: G,
        tasks: T,
        base_url: impl Into<String>,
        resync: Duration,
    ) -> Self {
        Self {
            registry,
            triggers,
            tasks,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resync,
        }
    }

    pub fn webhook_url(&self, key: &ObjectKey) -> String {
        format!(
            "{}{WEBHOOK_PATH_PREFIX}/{}/{}",
            self.base_url, key.namespace, key.name
        )
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut trigger_events = ObjectRepository::<WebhookTrigger>::watch(&self.triggers);
        let mut task_events = ObjectRepository::<Task>::watch(&self.tasks);

        self.resync_all().await;
        let mut resync = tokio::time::interval(self.resync);
        resync.tick().await;
        let registered = self.registry.len().await;
        tracing::info!(triggers = registered, "trigger controller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = trigger_events.recv() => match event {
                    Ok(WatchEvent::Applied(trigger)) => self.sync(&trigger.key()).await,
                    Ok(WatchEvent::Deleted(trigger)) => {
                        self.registry.unregister(&trigger.key()).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "trigger watch lagged, resyncing");
                        self.resync_all().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                event = task_events.recv() => match event {
                    Ok(event) => {
                        if let Some(trigger) = owning_trigger(&event) {
                            self.sync(&trigger).await;
                        }
                    }
                    Err(RecvError::Lagged(_)) => self.resync_all().await,
                    Err(RecvError::Closed) => break,
                },
                _ = resync.tick() => self.resync_all().await,
            }
        }
        tracing::info!("trigger controller stopped");
    }

    /// Re-register every stored trigger and drop registry entries whose
    /// trigger no longer exists.
    pub async fn resync_all(&self) {
        let stored = match ObjectRepository::<WebhookTrigger>::list(&self.triggers, &ListParams::all()).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "trigger resync failed");
                return;
            }
        };
        let live: HashSet<ObjectKey> = stored.iter().map(|t| t.key()).collect();
        for key in self.registry.keys().await {
            if !live.contains(&key) {
                self.registry.unregister(&key).await;
            }
        }
        for trigger in &stored {
            self.sync(&trigger.key()).await;
        }
    }

    /// Register the stored trigger and bring its status up to date.
    pub async fn sync(&self, key: &ObjectKey) {
        if let Err(e) = self.try_sync(key).await {
            // Conflicts resolve on the next event for this trigger.
            if e.is_transient() {
                tracing::debug!(trigger = %key, error = %e, "trigger status sync deferred");
            } else {
                tracing::warn!(trigger = %key, error = %e, "trigger status sync failed");
            }
        }
    }

    async fn try_sync(&self, key: &ObjectKey) -> Result<(), RepositoryError> {
        let Some(mut trigger) = ObjectRepository::<WebhookTrigger>::get(&self.triggers, key).await? else {
            self.registry.unregister(key).await;
            return Ok(());
        };
        if self.registry.register(trigger.clone()).await.is_err() {
            return Ok(());
        }

        let active = self.active_task_names(key).await?;
        let desired = desired_status(&trigger.status, self.webhook_url(key), &active);
        if desired == trigger.status {
            return Ok(());
        }
        trigger.status = desired;
        StatusRepository::<WebhookTrigger>::update_status(&self.triggers, &trigger).await?;
        Ok(())
    }

    async fn active_task_names(&self, key: &ObjectKey) -> Result<HashSet<String>, RepositoryError> {
        let params = ListParams::in_namespace(&key.namespace).with_label(LABEL_WEBHOOK_TRIGGER, &key.name);
        let tasks = ObjectRepository::<Task>::list(&self.tasks, &params).await?;
        Ok(tasks
            .into_iter()
            .filter(Task::is_active)
            .map(|t| t.metadata.name)
            .collect())
    }
}

fn owning_trigger(event: &WatchEvent<Task>) -> Option<ObjectKey> {
    let task = match event {
        WatchEvent::Applied(task) | WatchEvent::Deleted(task) => task,
    };
    task.metadata
        .labels
        .get(LABEL_WEBHOOK_TRIGGER)
        .map(|name| ObjectKey::new(&task.metadata.namespace, name))
}

fn desired_status(current: &WebhookTriggerStatus, url: String, active: &HashSet<String>) -> WebhookTriggerStatus {
    let mut status = current.clone();
    status.webhook_url = Some(url);
    status.active_tasks.retain(|name| active.contains(name));
    for rule in &mut status.rule_statuses {
        rule.active_resources.retain(|name| active.contains(name));
    }
    status
}
