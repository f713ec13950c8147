use serde::{Deserialize, Serialize};
use std::fmt;

/// Approval state machine states.
///
/// The remote allowance is ground truth; this state is a cache of its
/// trajectory and must self-correct when an observed allowance disagrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalState {
    /// No usable allowance; approval must be requested before the action
    Idle,
    /// A grant has been submitted and its outcome is not yet terminal
    Pending,
    /// A non-zero allowance has been confirmed or observed
    Approved,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Idle => "IDLE",
            ApprovalState::Pending => "PENDING",
            ApprovalState::Approved => "APPROVED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: ApprovalState) -> bool {
        use ApprovalState::*;

        match (self, target) {
            // Grant submitted
            (Idle, Pending) => true,

            // Grant confirmed, or allowance observed > 0 while pending
            (Pending, Approved) => true,

            // Allowance observed == 0 forces Idle from anywhere
            (Pending, Idle) => true,
            (Approved, Idle) => true,

            // Re-grant to raise an existing allowance
            (Approved, Pending) => true,

            _ => false,
        }
    }

    /// Is a dependent action allowed to proceed from this state?
    pub fn action_allowed(&self) -> bool {
        matches!(self, ApprovalState::Approved)
    }

    /// Is a grant currently in flight?
    pub fn is_pending(&self) -> bool {
        matches!(self, ApprovalState::Pending)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ApprovalState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "IDLE" => Ok(ApprovalState::Idle),
            "PENDING" => Ok(ApprovalState::Pending),
            "APPROVED" => Ok(ApprovalState::Approved),
            _ => Err(format!("Unknown approval state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use ApprovalState::*;

        assert!(Idle.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Idle));
        assert!(Pending.can_transition_to(Idle));
        assert!(Approved.can_transition_to(Pending));

        // A pending grant cannot be re-submitted
        assert!(!Pending.can_transition_to(Pending));
        // An allowance is never confirmed without a tracked grant
        assert!(!Idle.can_transition_to(Approved));
    }

    #[test]
    fn test_action_gating() {
        assert!(!ApprovalState::Idle.action_allowed());
        assert!(!ApprovalState::Pending.action_allowed());
        assert!(ApprovalState::Approved.action_allowed());
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(
            ApprovalState::try_from("pending").unwrap(),
            ApprovalState::Pending
        );
        assert!(ApprovalState::try_from("INVALID").is_err());
    }
}
