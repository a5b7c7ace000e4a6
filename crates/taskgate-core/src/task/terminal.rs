//! Terminal reason classification for failed workloads.

use taskgate_types::task::TerminalReason;

use crate::workload::ContainerTermination;

/// Runtime reason for a container killed for exceeding its memory limit.
pub const REASON_OOM_KILLED: &str = "OOMKilled";

/// Runtime reason for a container whose process exited non-zero.
pub const REASON_ERROR: &str = "Error";

/// Classify the last terminated state of the agent container.
///
/// A missing state (no status, or a workload that vanished) is `Unknown`.
pub fn classify_termination(container: Option<&ContainerTermination>) -> TerminalReason {
    let Some(state) = container else {
        return TerminalReason::Unknown;
    };
    if state.reason.is_empty() && state.exit_code == 0 {
        return TerminalReason::Unknown;
    }
    if state.reason == REASON_OOM_KILLED {
        TerminalReason::InfrastructureError
    } else if state.exit_code != 0 && state.reason == REASON_ERROR {
        TerminalReason::AgentExitNonZero
    } else {
        TerminalReason::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(exit_code: i32, reason: &str) -> ContainerTermination {
        ContainerTermination {
            exit_code,
            reason: reason.to_string(),
            message: None,
        }
    }

    #[test]
    fn test_missing_state_is_unknown() {
        assert_eq!(classify_termination(None), TerminalReason::Unknown);
        assert_eq!(
            classify_termination(Some(&ContainerTermination::default())),
            TerminalReason::Unknown
        );
    }

    #[test]
    fn test_oom_is_infrastructure() {
        assert_eq!(
            classify_termination(Some(&term(137, "OOMKilled"))),
            TerminalReason::InfrastructureError
        );
    }

    #[test]
    fn test_nonzero_error_is_agent_failure() {
        assert_eq!(
            classify_termination(Some(&term(1, "Error"))),
            TerminalReason::AgentExitNonZero
        );
    }

    #[test]
    fn test_other_reasons_are_unknown() {
        assert_eq!(
            classify_termination(Some(&term(0, "Error"))),
            TerminalReason::Unknown
        );
        assert_eq!(
            classify_termination(Some(&term(2, "ContainerCannotRun"))),
            TerminalReason::Unknown
        );
    }
}
