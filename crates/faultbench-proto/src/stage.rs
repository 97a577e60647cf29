//! Problem lifecycle stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage of a benchmark problem.
///
/// Stages are strictly ordered from `Created` to `CleanedUp`; `Failed` is an
/// absorbing branch reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Created,
    Deployed,
    FaultInjected,
    WorkloadActive,
    AwaitingSubmission,
    Graded,
    Recovered,
    CleanedUp,
    Failed,
}

impl Stage {
    /// Position in the forward ordering. `Failed` has no position.
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Stage::Created => Some(0),
            Stage::Deployed => Some(1),
            Stage::FaultInjected => Some(2),
            Stage::WorkloadActive => Some(3),
            Stage::AwaitingSubmission => Some(4),
            Stage::Graded => Some(5),
            Stage::Recovered => Some(6),
            Stage::CleanedUp => Some(7),
            Stage::Failed => None,
        }
    }

    /// Returns true if the move `self -> next` is a legal lifecycle edge.
    pub fn can_transition(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (CleanedUp, _) => false,
            (_, Failed) => true,
            (Created, Deployed)
            | (Deployed, FaultInjected)
            | (FaultInjected, WorkloadActive)
            | (FaultInjected | WorkloadActive, AwaitingSubmission)
            | (AwaitingSubmission, Graded)
            | (FaultInjected | WorkloadActive | AwaitingSubmission | Graded, Recovered)
            | (Graded | Recovered | Failed, CleanedUp) => true,
            _ => false,
        }
    }

    /// Returns true if a fault may still be live in this stage.
    pub fn holds_fault(self) -> bool {
        matches!(
            self,
            Stage::FaultInjected | Stage::WorkloadActive | Stage::AwaitingSubmission | Stage::Graded
        )
    }

    /// Returns true once no further transition is possible.
    pub fn is_terminal(self) -> bool {
        self == Stage::CleanedUp
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Created => "CREATED",
            Stage::Deployed => "DEPLOYED",
            Stage::FaultInjected => "FAULT_INJECTED",
            Stage::WorkloadActive => "WORKLOAD_ACTIVE",
            Stage::AwaitingSubmission => "AWAITING_SUBMISSION",
            Stage::Graded => "GRADED",
            Stage::Recovered => "RECOVERED",
            Stage::CleanedUp => "CLEANED_UP",
            Stage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_edges() {
        assert!(Stage::Created.can_transition(Stage::Deployed));
        assert!(Stage::Deployed.can_transition(Stage::FaultInjected));
        assert!(Stage::FaultInjected.can_transition(Stage::AwaitingSubmission));
        assert!(Stage::WorkloadActive.can_transition(Stage::AwaitingSubmission));
        assert!(Stage::AwaitingSubmission.can_transition(Stage::Graded));
        assert!(Stage::Graded.can_transition(Stage::Recovered));
        assert!(Stage::Recovered.can_transition(Stage::CleanedUp));
    }

    #[test]
    fn test_no_backward_edges() {
        assert!(!Stage::Deployed.can_transition(Stage::Created));
        assert!(!Stage::Graded.can_transition(Stage::AwaitingSubmission));
        assert!(!Stage::Recovered.can_transition(Stage::FaultInjected));
        assert!(!Stage::Created.can_transition(Stage::FaultInjected));
    }

    #[test]
    fn test_failed_is_absorbing_except_cleanup() {
        assert!(Stage::Deployed.can_transition(Stage::Failed));
        assert!(Stage::AwaitingSubmission.can_transition(Stage::Failed));
        assert!(Stage::Failed.can_transition(Stage::CleanedUp));
        assert!(!Stage::Failed.can_transition(Stage::Deployed));
        assert!(!Stage::CleanedUp.can_transition(Stage::Failed));
    }

    #[test]
    fn test_ordering_is_strict() {
        let forward = [
            Stage::Created,
            Stage::Deployed,
            Stage::FaultInjected,
            Stage::WorkloadActive,
            Stage::AwaitingSubmission,
            Stage::Graded,
            Stage::Recovered,
            Stage::CleanedUp,
        ];
        for pair in forward.windows(2) {
            assert!(pair[0].ordinal() < pair[1].ordinal());
        }
        assert_eq!(Stage::Failed.ordinal(), None);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Stage::AwaitingSubmission).unwrap();
        assert_eq!(json, "\"AWAITING_SUBMISSION\"");
    }
}
