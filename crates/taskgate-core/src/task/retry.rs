//! Retry and backoff calculation for retry-eligible task failures.
//!
//! Stateless: every function takes the policy and attempt count as input.
//! `attempt` is 1-based (the first start is attempt 1).

use std::time::Duration;

use taskgate_types::task::{BackoffProfile, RetryPolicy, TerminalReason};

/// Constant delay of the linear profile.
pub const LINEAR_DELAY: Duration = Duration::from_secs(30);

/// First delay of the exponential profile, doubled on each further attempt.
pub const EXPONENTIAL_BASE_DELAY: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// RetryDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the task once `delay` has elapsed.
    Retry { delay: Duration },
    /// Record the failure as terminal.
    GiveUp,
}

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

pub struct RetryHandler;

impl RetryHandler {
    /// Whether another start is allowed after `attempt` starts.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.max_attempts
    }

    /// Delay before the retry following `attempt`.
    pub fn delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let raw = match policy.backoff {
            BackoffProfile::Linear => LINEAR_DELAY,
            BackoffProfile::Exponential => {
                let exp = attempt.saturating_sub(1).min(31);
                EXPONENTIAL_BASE_DELAY.saturating_mul(1u32 << exp)
            }
        };
        match policy.max_delay_secs {
            Some(cap) => raw.min(Duration::from_secs(cap)),
            None => raw,
        }
    }

    /// Combine classification and policy into a decision.
    pub fn decide(policy: &RetryPolicy, reason: TerminalReason, attempt: u32) -> RetryDecision {
        if reason.is_retryable() && Self::should_retry(policy, attempt) {
            RetryDecision::Retry {
                delay: Self::delay(policy, attempt),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffProfile, max_delay_secs: Option<u64>) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff,
            max_delay_secs,
        }
    }

    #[test]
    fn test_linear_delay_is_constant() {
        let p = policy(BackoffProfile::Linear, None);
        assert_eq!(RetryHandler::delay(&p, 1), Duration::from_secs(30));
        assert_eq!(RetryHandler::delay(&p, 7), Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_delay_doubles() {
        let p = policy(BackoffProfile::Exponential, None);
        assert_eq!(RetryHandler::delay(&p, 1), Duration::from_secs(5));
        assert_eq!(RetryHandler::delay(&p, 2), Duration::from_secs(10));
        assert_eq!(RetryHandler::delay(&p, 3), Duration::from_secs(20));
        assert_eq!(RetryHandler::delay(&p, 4), Duration::from_secs(40));
    }

    #[test]
    fn test_exponential_delay_respects_cap_and_never_overflows() {
        let p = policy(BackoffProfile::Exponential, Some(60));
        assert_eq!(RetryHandler::delay(&p, 4), Duration::from_secs(40));
        assert_eq!(RetryHandler::delay(&p, 5), Duration::from_secs(60));
        assert_eq!(RetryHandler::delay(&p, u32::MAX), Duration::from_secs(60));

        let uncapped = policy(BackoffProfile::Exponential, None);
        assert!(RetryHandler::delay(&uncapped, u32::MAX) > Duration::from_secs(60));
    }

    #[test]
    fn test_should_retry_until_max_attempts() {
        let p = RetryPolicy::default();
        assert!(RetryHandler::should_retry(&p, 1));
        assert!(RetryHandler::should_retry(&p, 2));
        assert!(!RetryHandler::should_retry(&p, 3));
    }

    #[test]
    fn test_only_infrastructure_errors_are_retried() {
        let p = RetryPolicy::default();
        assert_eq!(
            RetryHandler::decide(&p, TerminalReason::InfrastructureError, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(30)
            }
        );
        assert_eq!(
            RetryHandler::decide(&p, TerminalReason::InfrastructureError, 3),
            RetryDecision::GiveUp
        );
        assert_eq!(
            RetryHandler::decide(&p, TerminalReason::AgentExitNonZero, 1),
            RetryDecision::GiveUp
        );
        assert_eq!(
            RetryHandler::decide(&p, TerminalReason::Unknown, 1),
            RetryDecision::GiveUp
        );
    }
}
