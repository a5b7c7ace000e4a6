//! Per-agent admission limits: concurrency capacity and start-rate quota.
//!
//! Both trackers query the store afresh on every call. There is no cache and
//! no lock across reconcilers, so two workers may both see the last free slot;
//! the overshoot is bounded by the worker count and no further task is
//! admitted until usage drops below the limit again.

pub mod capacity;
pub mod quota;

use chrono::{DateTime, Utc};
use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{ObjectKey, Resource};
use taskgate_types::task::{Task, TaskPhase};

use crate::repository::{ListParams, TaskRepository};

pub use capacity::CapacityTracker;
pub use quota::{QuotaCheck, QuotaTracker};

/// Free slots under a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Headroom {
    Unlimited,
    Limited(u32),
}

impl Headroom {
    /// Headroom left once `used` slots of `limit` are taken.
    pub fn from_usage(limit: Option<u32>, used: usize) -> Self {
        match limit {
            None => Headroom::Unlimited,
            Some(max) => {
                let used = u32::try_from(used).unwrap_or(u32::MAX);
                Headroom::Limited(max.saturating_sub(used))
            }
        }
    }

    /// Whether more than `n` slots are free.
    pub fn exceeds(self, n: usize) -> bool {
        match self {
            Headroom::Unlimited => true,
            Headroom::Limited(free) => free as usize > n,
        }
    }
}

/// Every task counted against `agent`, across all namespaces.
pub async fn tasks_for_agent<T: TaskRepository>(
    tasks: &T,
    agent: &ObjectKey,
) -> Result<Vec<Task>, RepositoryError> {
    let all = tasks.list(&ListParams::all()).await?;
    Ok(all
        .into_iter()
        .filter(|t| t.agent_key().as_ref() == Some(agent))
        .collect())
}

/// Queued tasks that may be admitted right now (not waiting out a retry
/// backoff, not being stopped).
pub fn is_eligible_queued(task: &Task, now: DateTime<Utc>) -> bool {
    task.phase() == TaskPhase::Queued
        && !task.stop_requested()
        && task.status.retry_after.is_none_or(|at| at <= now)
}

/// Number of eligible queued peers created before `task`.
///
/// Ties on creation time break by namespace, then name, so the order is total.
pub fn queued_ahead(task: &Task, peers: &[Task], now: DateTime<Utc>) -> usize {
    let position = fifo_key(task);
    peers
        .iter()
        .filter(|p| p.key() != task.key())
        .filter(|p| is_eligible_queued(p, now))
        .filter(|p| fifo_key(p) < position)
        .count()
}

fn fifo_key(task: &Task) -> (Option<DateTime<Utc>>, &str, &str) {
    let meta = &task.metadata;
    (meta.creation_timestamp, &meta.namespace, &meta.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use taskgate_types::meta::ObjectMeta;
    use taskgate_types::task::TaskSpec;

    fn queued(name: &str, created: DateTime<Utc>) -> Task {
        let mut meta = ObjectMeta::new("default", name);
        meta.creation_timestamp = Some(created);
        let mut task = Task::new(meta, TaskSpec::default());
        task.status.phase = Some(TaskPhase::Queued);
        task
    }

    #[test]
    fn test_headroom_from_usage() {
        assert_eq!(Headroom::from_usage(None, 10), Headroom::Unlimited);
        assert_eq!(Headroom::from_usage(Some(3), 1), Headroom::Limited(2));
        assert_eq!(Headroom::from_usage(Some(1), 4), Headroom::Limited(0));

        assert!(Headroom::Unlimited.exceeds(1000));
        assert!(Headroom::Limited(2).exceeds(1));
        assert!(!Headroom::Limited(2).exceeds(2));
        assert!(!Headroom::Limited(0).exceeds(0));
    }

    #[test]
    fn test_queued_ahead_counts_older_eligible_peers() {
        let now = Utc::now();
        let a = queued("a", now - Duration::seconds(30));
        let b = queued("b", now - Duration::seconds(20));
        let c = queued("c", now - Duration::seconds(10));
        let peers = vec![a.clone(), b.clone(), c.clone()];

        assert_eq!(queued_ahead(&a, &peers, now), 0);
        assert_eq!(queued_ahead(&b, &peers, now), 1);
        assert_eq!(queued_ahead(&c, &peers, now), 2);
    }

    #[test]
    fn test_queued_ahead_breaks_ties_by_name() {
        let now = Utc::now();
        let t = now - Duration::seconds(5);
        let a = queued("a", t);
        let b = queued("b", t);
        let peers = vec![b.clone(), a.clone()];

        assert_eq!(queued_ahead(&a, &peers, now), 0);
        assert_eq!(queued_ahead(&b, &peers, now), 1);
    }

    #[test]
    fn test_backoff_and_stopping_peers_do_not_hold_the_line() {
        let now = Utc::now();
        let mut waiting = queued("a", now - Duration::seconds(30));
        waiting.status.retry_after = Some(now + Duration::seconds(30));
        let mut stopping = queued("b", now - Duration::seconds(20));
        stopping
            .metadata
            .annotations
            .insert(taskgate_types::meta::ANNOTATION_STOP.to_string(), "true".to_string());
        let c = queued("c", now - Duration::seconds(10));
        let peers = vec![waiting, stopping, c.clone()];

        assert_eq!(queued_ahead(&c, &peers, now), 0);
    }
}
