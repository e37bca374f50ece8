//! Application status machine and resolution enums.
//!
//! # Responsibility
//! - Define every lifecycle state an application can be in.
//! - Hold the transition table consulted before any status write.
//! - Define node-level decisions and the application-level resolution.
//!
//! # Invariants
//! - Terminal states (`rejected`, `rejected_feasibility`,
//!   `declined_by_applicant`, `expired`) have no outgoing transitions.
//! - Writing the same status again is not a transition and is always allowed.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Lifecycle state of one application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderFeasibilityReview,
    RejectedFeasibility,
    PendingEvaluation,
    UnderEvaluation,
    Evaluated,
    Accepted,
    /// Waiting list.
    Pending,
    Rejected,
    DeclinedByApplicant,
    Expired,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 12] = [
        Self::Draft,
        Self::Submitted,
        Self::UnderFeasibilityReview,
        Self::RejectedFeasibility,
        Self::PendingEvaluation,
        Self::UnderEvaluation,
        Self::Evaluated,
        Self::Accepted,
        Self::Pending,
        Self::Rejected,
        Self::DeclinedByApplicant,
        Self::Expired,
    ];

    /// Stable storage string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderFeasibilityReview => "under_feasibility_review",
            Self::RejectedFeasibility => "rejected_feasibility",
            Self::PendingEvaluation => "pending_evaluation",
            Self::UnderEvaluation => "under_evaluation",
            Self::Evaluated => "evaluated",
            Self::Accepted => "accepted",
            Self::Pending => "pending",
            Self::Rejected => "rejected",
            Self::DeclinedByApplicant => "declined_by_applicant",
            Self::Expired => "expired",
        }
    }

    /// Parses a storage string; `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
    }

    /// Statuses reachable from `self` in one step.
    pub fn next_valid_states(self) -> &'static [ApplicationStatus] {
        use ApplicationStatus::*;
        match self {
            Draft => &[Submitted],
            Submitted => &[UnderFeasibilityReview, RejectedFeasibility],
            UnderFeasibilityReview => &[RejectedFeasibility, PendingEvaluation],
            PendingEvaluation => &[UnderEvaluation],
            UnderEvaluation => &[Evaluated],
            Evaluated => &[Accepted, Pending, Rejected],
            Accepted => &[DeclinedByApplicant, Expired],
            Pending => &[Accepted, Rejected],
            RejectedFeasibility | Rejected | DeclinedByApplicant | Expired => &[],
        }
    }

    pub fn can_transition_to(self, next: ApplicationStatus) -> bool {
        self.next_valid_states().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.next_valid_states().is_empty()
    }

    /// Validates a status write from `self` to `next`.
    ///
    /// Re-writing the current status is accepted as a no-op.
    pub fn transition_to(self, next: ApplicationStatus) -> Result<ApplicationStatus, TransitionError> {
        if self == next || self.can_transition_to(next) {
            return Ok(next);
        }
        Err(TransitionError {
            from: self,
            to: next,
        })
    }
}

impl Display for ApplicationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
}

impl Display for TransitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let valid = self.from.next_valid_states();
        if valid.is_empty() {
            return write!(
                f,
                "invalid status transition from '{}' to '{}'; valid next states: none (terminal state)",
                self.from, self.to
            );
        }
        let names = valid
            .iter()
            .map(|status| status.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "invalid status transition from '{}' to '{}'; valid next states: {}",
            self.from, self.to, names
        )
    }
}

impl Error for TransitionError {}

/// One node coordinator's decision on one application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeDecision {
    Accept,
    Waitlist,
    Reject,
}

impl NodeDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Waitlist => "waitlist",
            Self::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accept" => Some(Self::Accept),
            "waitlist" => Some(Self::Waitlist),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

impl Display for NodeDecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level final disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Accepted,
    /// Waiting list.
    Pending,
    Rejected,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Pending => "pending",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accepted" => Some(Self::Accepted),
            "pending" => Some(Self::Pending),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Status an application moves to when this resolution is applied.
    pub fn status(self) -> ApplicationStatus {
        match self {
            Self::Accepted => ApplicationStatus::Accepted,
            Self::Pending => ApplicationStatus::Pending,
            Self::Rejected => ApplicationStatus::Rejected,
        }
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{ApplicationStatus, NodeDecision, Resolution};

    #[test]
    fn storage_strings_round_trip_for_every_status() {
        for status in ApplicationStatus::ALL {
            assert_eq!(ApplicationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ApplicationStatus::parse("scheduled"), None);
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        let terminal = [
            ApplicationStatus::Rejected,
            ApplicationStatus::RejectedFeasibility,
            ApplicationStatus::DeclinedByApplicant,
            ApplicationStatus::Expired,
        ];
        for status in ApplicationStatus::ALL {
            assert_eq!(status.is_terminal(), terminal.contains(&status), "{status}");
        }
    }

    #[test]
    fn rejected_cannot_move_anywhere() {
        for next in ApplicationStatus::ALL {
            if next == ApplicationStatus::Rejected {
                continue;
            }
            let err = ApplicationStatus::Rejected
                .transition_to(next)
                .expect_err("rejected is terminal");
            assert_eq!(err.from, ApplicationStatus::Rejected);
            assert!(err.to_string().contains("terminal"));
        }
    }

    #[test]
    fn happy_path_is_reachable_step_by_step() {
        let path = [
            ApplicationStatus::Draft,
            ApplicationStatus::Submitted,
            ApplicationStatus::UnderFeasibilityReview,
            ApplicationStatus::PendingEvaluation,
            ApplicationStatus::UnderEvaluation,
            ApplicationStatus::Evaluated,
            ApplicationStatus::Pending,
            ApplicationStatus::Accepted,
            ApplicationStatus::Expired,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn evaluated_cannot_skip_back_to_draft() {
        let err = ApplicationStatus::Evaluated
            .transition_to(ApplicationStatus::Draft)
            .unwrap_err();
        assert!(err.to_string().contains("accepted, pending, rejected"));
    }

    #[test]
    fn same_status_write_is_allowed() {
        assert_eq!(
            ApplicationStatus::Expired.transition_to(ApplicationStatus::Expired),
            Ok(ApplicationStatus::Expired)
        );
    }

    #[test]
    fn resolution_maps_to_matching_status() {
        assert_eq!(Resolution::Accepted.status(), ApplicationStatus::Accepted);
        assert_eq!(Resolution::Pending.status(), ApplicationStatus::Pending);
        assert_eq!(Resolution::Rejected.status(), ApplicationStatus::Rejected);
        assert_eq!(NodeDecision::parse("waitlist"), Some(NodeDecision::Waitlist));
        assert_eq!(NodeDecision::parse(""), None);
    }
}
