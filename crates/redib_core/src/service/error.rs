//! Workflow error taxonomy shared by every service.
//!
//! `ValidationError` is a business-rule rejection raised before any write.
//! `WorkflowError::Repo` carries storage failures and `InvalidTransition`
//! unchanged from the repository layer.

use crate::db::DbError;
use crate::model::call::CallStatus;
use crate::model::directory::{EquipmentId, Role, UserId};
use crate::model::status::{ApplicationStatus, Resolution, TransitionError};
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Reject attempted on an application with competitive funding.
    CompetitiveFundingProtected { application_code: String },
    WrongNodeCoordinator { user_id: UserId, node_code: String },
    EquipmentNotRequested(EquipmentId),
    EquipmentNotAtNode { equipment_id: EquipmentId, node_code: String },
    /// The node owns none of the requested equipment.
    NodeNotInvolved { node_code: String },
    /// Node decisions are frozen once the final resolution is set.
    ApplicationAlreadyResolved {
        application_code: String,
        resolution: Resolution,
    },
    UnexpectedStatus {
        application_code: String,
        expected: ApplicationStatus,
        actual: ApplicationStatus,
    },
    IncompleteApplication(&'static str),
    SubmissionClosed { call_code: String },
    CallNotOpen { call_code: String },
    UnexpectedCallStatus {
        call_code: String,
        expected: CallStatus,
        actual: CallStatus,
    },
    ResolutionLocked { call_code: String },
    UnresolvedApplications { call_code: String, count: usize },
    InsufficientHours {
        equipment_id: EquipmentId,
        requested: f64,
        remaining: f64,
    },
    /// `reason` is `completed` or `past_deadline`.
    EvaluationLocked { reason: &'static str },
    ScoreOutOfRange(u8),
    NotAssignedEvaluator { user_id: UserId },
    AlreadyResponded { application_code: String },
    AcceptanceDeadlinePassed { application_code: String },
    NotApplicant { user_id: UserId },
    MissingRole { user_id: UserId, role: Role },
    AlreadyReviewed { application_code: String, node_code: String },
    InvalidHours(f64),
    InvalidDoi(String),
    /// Publication date not in `YYYY-MM-DD` form.
    InvalidDate(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CompetitiveFundingProtected { application_code } => write!(
                f,
                "application {application_code} has competitive funding and cannot be rejected; accept or waitlist it"
            ),
            Self::WrongNodeCoordinator { user_id, node_code } => write!(
                f,
                "user {user_id} is not an active node coordinator for {node_code}"
            ),
            Self::EquipmentNotRequested(id) => {
                write!(f, "equipment {id} is not requested in this application")
            }
            Self::EquipmentNotAtNode {
                equipment_id,
                node_code,
            } => write!(f, "equipment {equipment_id} does not belong to {node_code}"),
            Self::NodeNotInvolved { node_code } => write!(
                f,
                "application requests no equipment from {node_code}"
            ),
            Self::ApplicationAlreadyResolved {
                application_code,
                resolution,
            } => write!(
                f,
                "application {application_code} is already resolved as `{resolution}`"
            ),
            Self::UnexpectedStatus {
                application_code,
                expected,
                actual,
            } => write!(
                f,
                "application {application_code} must be `{expected}`, but is `{actual}`"
            ),
            Self::IncompleteApplication(reason) => write!(f, "application incomplete: {reason}"),
            Self::SubmissionClosed { call_code } => {
                write!(f, "call {call_code} is not accepting submissions")
            }
            Self::CallNotOpen { call_code } => write!(f, "call {call_code} is not open"),
            Self::UnexpectedCallStatus {
                call_code,
                expected,
                actual,
            } => write!(
                f,
                "call {call_code} must be `{}`, but is `{}`",
                expected.as_str(),
                actual.as_str()
            ),
            Self::ResolutionLocked { call_code } => {
                write!(f, "resolution of call {call_code} is locked")
            }
            Self::UnresolvedApplications { call_code, count } => write!(
                f,
                "call {call_code} still has {count} evaluated application(s) without resolution"
            ),
            Self::InsufficientHours {
                equipment_id,
                requested,
                remaining,
            } => write!(
                f,
                "equipment {equipment_id} has {remaining:.1} hours left; {requested:.1} requested"
            ),
            Self::EvaluationLocked { reason } => write!(f, "evaluation is locked ({reason})"),
            Self::ScoreOutOfRange(score) => write!(f, "criterion score {score} outside 0..=2"),
            Self::NotAssignedEvaluator { user_id } => {
                write!(f, "user {user_id} is not the assigned evaluator")
            }
            Self::AlreadyResponded { application_code } => write!(
                f,
                "applicant already answered the acceptance of {application_code}"
            ),
            Self::AcceptanceDeadlinePassed { application_code } => write!(
                f,
                "acceptance deadline of {application_code} has passed"
            ),
            Self::NotApplicant { user_id } => {
                write!(f, "user {user_id} is not the applicant of this application")
            }
            Self::MissingRole { user_id, role } => {
                write!(f, "user {user_id} lacks active role `{}`", role.as_str())
            }
            Self::AlreadyReviewed {
                application_code,
                node_code,
            } => write!(
                f,
                "feasibility of {application_code} was already reviewed by {node_code}"
            ),
            Self::InvalidHours(hours) => write!(f, "hours must be a non-negative number, got {hours}"),
            Self::InvalidDoi(doi) => write!(f, "invalid DOI `{doi}`; expected 10.<registrant>/<suffix>"),
            Self::InvalidDate(date) => write!(f, "invalid date `{date}`; expected YYYY-MM-DD"),
        }
    }
}

impl Error for ValidationError {}

#[derive(Debug)]
pub enum WorkflowError {
    Validation(ValidationError),
    Repo(RepoError),
}

impl WorkflowError {
    /// The business-rule rejection, if this is one.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(_) => None,
        }
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::Repo(RepoError::InvalidTransition(_)))
    }
}

impl Display for WorkflowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for WorkflowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<ValidationError> for WorkflowError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for WorkflowError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<TransitionError> for WorkflowError {
    fn from(value: TransitionError) -> Self {
        Self::Repo(RepoError::InvalidTransition(value))
    }
}

impl From<DbError> for WorkflowError {
    fn from(value: DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for WorkflowError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}
