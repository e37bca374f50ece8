//! Application domain model and its per-node child records.
//!
//! # Responsibility
//! - Define the researcher submission and the equipment it requests.
//! - Define per-node feasibility reviews and per-node resolutions.
//! - Validate field-level invariants before persistence.
//!
//! # Invariants
//! - `resolution` is only set by aggregation or call-level resolution.
//! - `code` follows `{call_code}-{sequence:03}` and is assigned on first insert.
//! - `has_competitive_funding` is fixed once the application is submitted.

use crate::model::call::CallId;
use crate::model::directory::{EquipmentId, NodeId, UserId};
use crate::model::status::{ApplicationStatus, NodeDecision, Resolution};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ApplicationId = Uuid;

/// Upper bound of an evaluation total (six criteria scored 0..=2).
pub const MAX_TOTAL_SCORE: f64 = 12.0;
/// Days an applicant has to answer an acceptance.
pub const ACCEPTANCE_WINDOW_DAYS: u32 = 10;
const MAX_BRIEF_DESCRIPTION_CHARS: usize = 100;

/// Validation failures for application-owned records.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationValidationError {
    BriefDescriptionTooLong { chars: usize },
    FinalScoreOutOfRange(f64),
    NegativeHours(f64),
    /// Acceptance answer recorded while the application was never accepted.
    AnswerWithoutAcceptance(ApplicationStatus),
    /// Resolution recorded without a resolution date.
    ResolutionWithoutDate,
    /// `has_competitive_funding` changed after the draft stage.
    CompetitiveFundingFrozen(ApplicationStatus),
}

impl Display for ApplicationValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BriefDescriptionTooLong { chars } => write!(
                f,
                "brief description has {chars} chars; at most {MAX_BRIEF_DESCRIPTION_CHARS} allowed"
            ),
            Self::FinalScoreOutOfRange(score) => {
                write!(f, "final score {score} outside 0..={MAX_TOTAL_SCORE}")
            }
            Self::NegativeHours(hours) => write!(f, "hours must be a non-negative number, got {hours}"),
            Self::AnswerWithoutAcceptance(status) => write!(
                f,
                "applicant answer recorded while application status is `{status}`"
            ),
            Self::ResolutionWithoutDate => write!(f, "resolution set without resolution date"),
            Self::CompetitiveFundingFrozen(status) => write!(
                f,
                "competitive funding flag cannot change while application status is `{status}`"
            ),
        }
    }
}

impl Error for ApplicationValidationError {}

/// One researcher submission against one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub call_id: CallId,
    pub applicant_id: UserId,
    /// Empty until first persisted.
    pub code: String,
    pub status: ApplicationStatus,
    pub brief_description: String,

    pub project_title: String,
    pub project_code: String,
    pub funding_agency: String,
    /// Competitive-funding applications may be accepted or waitlisted, never rejected.
    pub has_competitive_funding: bool,
    /// `clinical`, `preclinical` or `radiotracers`; drives evaluator matching.
    pub specialization_area: Option<String>,

    pub scientific_relevance: String,
    pub methodology_description: String,
    pub expected_contributions: String,
    pub impact_strengths: String,

    pub uses_animals: bool,
    pub has_animal_ethics: bool,
    pub uses_humans: bool,
    pub has_human_ethics: bool,
    pub data_consent: bool,

    /// Mean of completed evaluation totals.
    pub final_score: Option<f64>,
    pub resolution: Option<Resolution>,
    pub resolution_date: Option<i64>,
    /// Aggregated `[NODE]: comment` blocks, then appended system notes.
    pub resolution_comments: String,
    /// `resolution_date + 10 days` once accepted.
    pub acceptance_deadline: Option<i64>,
    /// `None` until the applicant answers or the deadline expires.
    pub accepted_by_applicant: Option<bool>,
    pub accepted_at: Option<i64>,
    pub handoff_email_sent_at: Option<i64>,
    pub submitted_at: Option<i64>,
}

impl Application {
    /// Creates an unsaved draft with a generated stable ID.
    pub fn draft(call_id: CallId, applicant_id: UserId, brief_description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            call_id,
            applicant_id,
            code: String::new(),
            status: ApplicationStatus::Draft,
            brief_description: brief_description.into(),
            project_title: String::new(),
            project_code: String::new(),
            funding_agency: String::new(),
            has_competitive_funding: false,
            specialization_area: None,
            scientific_relevance: String::new(),
            methodology_description: String::new(),
            expected_contributions: String::new(),
            impact_strengths: String::new(),
            uses_animals: false,
            has_animal_ethics: false,
            uses_humans: false,
            has_human_ethics: false,
            data_consent: false,
            final_score: None,
            resolution: None,
            resolution_date: None,
            resolution_comments: String::new(),
            acceptance_deadline: None,
            accepted_by_applicant: None,
            accepted_at: None,
            handoff_email_sent_at: None,
            submitted_at: None,
        }
    }

    /// Validates field-level invariants.
    pub fn validate(&self) -> Result<(), ApplicationValidationError> {
        let chars = self.brief_description.chars().count();
        if chars > MAX_BRIEF_DESCRIPTION_CHARS {
            return Err(ApplicationValidationError::BriefDescriptionTooLong { chars });
        }
        if let Some(score) = self.final_score {
            if !(0.0..=MAX_TOTAL_SCORE).contains(&score) {
                return Err(ApplicationValidationError::FinalScoreOutOfRange(score));
            }
        }
        if self.resolution.is_some() && self.resolution_date.is_none() {
            return Err(ApplicationValidationError::ResolutionWithoutDate);
        }
        if self.accepted_by_applicant.is_some()
            && !matches!(
                self.status,
                ApplicationStatus::Accepted
                    | ApplicationStatus::DeclinedByApplicant
                    | ApplicationStatus::Expired
            )
        {
            return Err(ApplicationValidationError::AnswerWithoutAcceptance(
                self.status,
            ));
        }
        Ok(())
    }

    /// Appends one system note to `resolution_comments`, blank-line separated.
    pub fn append_resolution_note(&mut self, note: &str) {
        if !self.resolution_comments.is_empty() {
            self.resolution_comments.push_str("\n\n");
        }
        self.resolution_comments.push_str(note);
    }

    /// Whether the applicant still owes an answer on an accepted application.
    pub fn awaits_applicant_answer(&self) -> bool {
        self.status == ApplicationStatus::Accepted && self.accepted_by_applicant.is_none()
    }
}

/// One (application, equipment) pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedAccess {
    pub id: Uuid,
    pub application_id: ApplicationId,
    pub equipment_id: EquipmentId,
    pub hours_requested: f64,
    /// Set by the owning node's coordinator decision.
    pub hours_approved: Option<f64>,
    /// Set by call-level resolution.
    pub hours_granted: Option<f64>,
    pub is_completed: bool,
    pub completed_by: Option<UserId>,
    pub completed_at: Option<i64>,
    pub actual_hours_used: Option<f64>,
}

impl RequestedAccess {
    pub fn new(application_id: ApplicationId, equipment_id: EquipmentId, hours_requested: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_id,
            equipment_id,
            hours_requested,
            hours_approved: None,
            hours_granted: None,
            is_completed: false,
            completed_by: None,
            completed_at: None,
            actual_hours_used: None,
        }
    }

    pub fn validate(&self) -> Result<(), ApplicationValidationError> {
        let hours = [
            Some(self.hours_requested),
            self.hours_approved,
            self.hours_granted,
            self.actual_hours_used,
        ];
        for value in hours.into_iter().flatten() {
            validate_hours(value)?;
        }
        Ok(())
    }
}

/// Rejects negative or non-finite hour values.
pub fn validate_hours(hours: f64) -> Result<(), ApplicationValidationError> {
    if hours.is_finite() && hours >= 0.0 {
        Ok(())
    } else {
        Err(ApplicationValidationError::NegativeHours(hours))
    }
}

/// Node technical feasibility assessment (gate before evaluation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeasibilityReview {
    pub id: Uuid,
    pub application_id: ApplicationId,
    pub node_id: NodeId,
    pub reviewer_id: Option<UserId>,
    /// `None` while pending.
    pub is_feasible: Option<bool>,
    pub comments: String,
    pub reviewed_at: Option<i64>,
}

impl FeasibilityReview {
    pub fn pending(application_id: ApplicationId, node_id: NodeId, reviewer_id: Option<UserId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_id,
            node_id,
            reviewer_id,
            is_feasible: None,
            comments: String::new(),
            reviewed_at: None,
        }
    }
}

/// One node coordinator's decision for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResolution {
    pub id: Uuid,
    pub application_id: ApplicationId,
    pub node_id: NodeId,
    pub reviewer_id: UserId,
    /// `None` means unset.
    pub resolution: Option<NodeDecision>,
    pub comments: String,
    pub reviewed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::{Application, ApplicationValidationError, RequestedAccess};
    use crate::model::status::{ApplicationStatus, Resolution};
    use uuid::Uuid;

    fn draft() -> Application {
        Application::draft(Uuid::new_v4(), Uuid::new_v4(), "MRI follow-up study")
    }

    #[test]
    fn draft_starts_unresolved() {
        let app = draft();
        assert_eq!(app.status, ApplicationStatus::Draft);
        assert!(app.resolution.is_none());
        assert!(app.code.is_empty());
        app.validate().unwrap();
    }

    #[test]
    fn long_brief_description_is_rejected() {
        let mut app = draft();
        app.brief_description = "x".repeat(101);
        assert!(matches!(
            app.validate(),
            Err(ApplicationValidationError::BriefDescriptionTooLong { chars: 101 })
        ));
    }

    #[test]
    fn resolution_requires_date() {
        let mut app = draft();
        app.resolution = Some(Resolution::Pending);
        assert_eq!(
            app.validate(),
            Err(ApplicationValidationError::ResolutionWithoutDate)
        );
    }

    #[test]
    fn applicant_answer_requires_acceptance() {
        let mut app = draft();
        app.accepted_by_applicant = Some(true);
        assert!(app.validate().is_err());
        app.status = ApplicationStatus::Accepted;
        app.validate().unwrap();
    }

    #[test]
    fn notes_are_blank_line_separated() {
        let mut app = draft();
        app.append_resolution_note("[N1]: ok");
        app.append_resolution_note("AUTO-EXPIRED");
        assert_eq!(app.resolution_comments, "[N1]: ok\n\nAUTO-EXPIRED");
    }

    #[test]
    fn negative_hours_fail_validation() {
        let access = RequestedAccess::new(Uuid::new_v4(), Uuid::new_v4(), -1.0);
        assert!(access.validate().is_err());
        let mut ok = RequestedAccess::new(Uuid::new_v4(), Uuid::new_v4(), 12.5);
        ok.hours_approved = Some(f64::NAN);
        assert!(ok.validate().is_err());
    }
}
