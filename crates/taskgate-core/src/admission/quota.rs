//! Start-rate quota per Agent over a sliding window.

use chrono::{DateTime, Duration, Utc};
use taskgate_types::agent::{Agent, AgentQuota};
use taskgate_types::error::RepositoryError;
use taskgate_types::meta::{ObjectKey, Resource};
use taskgate_types::task::Task;

use super::{tasks_for_agent, Headroom};
use crate::repository::TaskRepository;

/// Windows longer than this (about a century) are clamped.
const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    pub remaining: Headroom,
    /// When the oldest start inside the window falls out of it.
    pub next_expiry: Option<DateTime<Utc>>,
}

impl QuotaCheck {
    pub fn unlimited() -> Self {
        Self {
            remaining: Headroom::Unlimited,
            next_expiry: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.remaining.exceeds(0)
    }
}

/// Start times of `agent`'s tasks within `[now - window, now]`, oldest first.
pub fn starts_in_window(
    agent: &ObjectKey,
    tasks: &[Task],
    window: Duration,
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let since = now - window;
    let mut starts: Vec<_> = tasks
        .iter()
        .filter(|t| t.agent_key().as_ref() == Some(agent))
        .filter_map(|t| t.status.start_time)
        .filter(|start| *start >= since && *start <= now)
        .collect();
    starts.sort();
    starts
}

pub fn check_quota(
    agent: &ObjectKey,
    quota: &AgentQuota,
    tasks: &[Task],
    now: DateTime<Utc>,
) -> QuotaCheck {
    let window = Duration::seconds(quota.window_seconds.min(MAX_WINDOW_SECS) as i64);
    let starts = starts_in_window(agent, tasks, window, now);
    QuotaCheck {
        remaining: Headroom::from_usage(Some(quota.max_task_starts), starts.len()),
        next_expiry: starts.first().map(|oldest| *oldest + window),
    }
}

/// Evaluates an Agent's start quota from a fresh store query.
pub struct QuotaTracker<T> {
    tasks: T,
}

impl<T: TaskRepository> QuotaTracker<T> {
    pub fn new(tasks: T) -> Self {
        Self { tasks }
    }

    pub async fn check(&self, agent: &Agent, now: DateTime<Utc>) -> Result<QuotaCheck, RepositoryError> {
        let Some(quota) = &agent.spec.quota else {
            return Ok(QuotaCheck::unlimited());
        };
        let key = agent.key();
        let tasks = tasks_for_agent(&self.tasks, &key).await?;
        Ok(check_quota(&key, quota, &tasks, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgate_types::meta::{ObjectMeta, ObjectRef};
    use taskgate_types::task::{TaskPhase, TaskSpec};

    fn started(name: &str, at: DateTime<Utc>) -> Task {
        let mut task = Task::new(
            ObjectMeta::new("default", name),
            TaskSpec {
                agent_ref: Some(ObjectRef::new("coder")),
                ..TaskSpec::default()
            },
        );
        task.status.phase = Some(TaskPhase::Completed);
        task.status.start_time = Some(at);
        task
    }

    fn coder() -> ObjectKey {
        ObjectKey::new("default", "coder")
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let now = Utc::now();
        let tasks = vec![
            started("edge", now - Duration::seconds(60)),
            started("old", now - Duration::seconds(61)),
            started("new", now),
        ];
        let starts = starts_in_window(&coder(), &tasks, Duration::seconds(60), now);
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0], now - Duration::seconds(60));
    }

    #[test]
    fn test_quota_blocks_at_limit() {
        let now = Utc::now();
        let quota = AgentQuota {
            max_task_starts: 2,
            window_seconds: 60,
        };
        let tasks = vec![
            started("a", now - Duration::seconds(50)),
            started("b", now - Duration::seconds(10)),
        ];

        let check = check_quota(&coder(), &quota, &tasks, now);
        assert!(check.is_blocked());
        assert_eq!(check.next_expiry, Some(now + Duration::seconds(10)));

        let check = check_quota(&coder(), &quota, &tasks[1..], now);
        assert!(!check.is_blocked());
        assert_eq!(check.remaining, Headroom::Limited(1));
    }

    #[test]
    fn test_completed_tasks_still_count_against_quota() {
        let now = Utc::now();
        let quota = AgentQuota {
            max_task_starts: 1,
            window_seconds: 3600,
        };
        let tasks = vec![started("done", now - Duration::minutes(5))];
        assert!(check_quota(&coder(), &quota, &tasks, now).is_blocked());
    }
}
