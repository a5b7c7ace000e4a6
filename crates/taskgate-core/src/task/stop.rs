//! Stop requests: mark a Task with the stop annotation.
//!
//! The reconciler does the actual teardown; this only records the intent.

use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{ObjectKey, ANNOTATION_STOP};

use crate::repository::TaskRepository;

/// Attempts made when the annotation write hits a version conflict.
pub const STOP_CONFLICT_ATTEMPTS: usize = 3;

/// Set `taskgate.io/stop: "true"` on the task, re-reading on conflict.
///
/// Returns `Ok(false)` when the task is gone, already terminal, or already
/// marked.
pub async fn request_stop<T: TaskRepository>(
    tasks: &T,
    key: &ObjectKey,
) -> Result<bool, RepositoryError> {
    let mut attempt = 1;
    loop {
        let Some(mut task) = tasks.get(key).await? else {
            return Ok(false);
        };
        if !task.is_active() || task.stop_requested() {
            return Ok(false);
        }
        task.metadata
            .annotations
            .insert(ANNOTATION_STOP.to_string(), "true".to_string());

        match tasks.update(&task).await {
            Ok(_) => {
                tracing::info!(task = %key, "stop requested");
                return Ok(true);
            }
            Err(RepositoryError::Conflict { .. }) if attempt < STOP_CONFLICT_ATTEMPTS => {
                tracing::debug!(task = %key, attempt, "conflict marking task for stop, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{ObjectRepository, StatusRepository};
    use crate::testing::FakeStore;
    use taskgate_types::meta::ObjectMeta;
    use taskgate_types::task::{Task, TaskPhase, TaskSpec};

    async fn stored_task(store: &FakeStore, phase: Option<TaskPhase>) -> ObjectKey {
        let task = Task::new(ObjectMeta::new("default", "t1"), TaskSpec::default());
        let mut task = ObjectRepository::<Task>::create(store, &task).await.unwrap();
        if phase.is_some() {
            task.status.phase = phase;
            StatusRepository::<Task>::update_status(store, &task).await.unwrap();
        }
        task.metadata.key()
    }

    #[tokio::test]
    async fn test_marks_active_task() {
        let store = FakeStore::new();
        let key = stored_task(&store, Some(TaskPhase::Running)).await;

        assert!(request_stop(&store, &key).await.unwrap());
        assert!(store.task("default", "t1").stop_requested());
        // Second request is a no-op.
        assert!(!request_stop(&store, &key).await.unwrap());
    }

    #[tokio::test]
    async fn test_skips_terminal_and_missing_tasks() {
        let store = FakeStore::new();
        let key = stored_task(&store, Some(TaskPhase::Completed)).await;
        assert!(!request_stop(&store, &key).await.unwrap());
        assert!(!store.task("default", "t1").stop_requested());

        let missing = ObjectKey::new("default", "nope");
        assert!(!request_stop(&store, &missing).await.unwrap());
    }
}
