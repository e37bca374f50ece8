//! Outbound communication log and per-user notification preferences.
//!
//! Emails are queued into `email_logs`; delivery happens outside the core.
//! The log doubles as the dedup source for reminders.

use crate::model::directory::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Template type of one queued email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    CallPublished,
    ApplicationReceived,
    FeasibilityRequest,
    FeasibilityReminder,
    FeasibilityRejected,
    EvaluationAssigned,
    EvaluationReminder,
    EvaluationsComplete,
    ResolutionAccepted,
    ResolutionPending,
    ResolutionRejected,
    AcceptanceReminder,
    AccessHandoff,
    PublicationFollowup,
}

impl EmailKind {
    pub const ALL: [EmailKind; 14] = [
        Self::CallPublished,
        Self::ApplicationReceived,
        Self::FeasibilityRequest,
        Self::FeasibilityReminder,
        Self::FeasibilityRejected,
        Self::EvaluationAssigned,
        Self::EvaluationReminder,
        Self::EvaluationsComplete,
        Self::ResolutionAccepted,
        Self::ResolutionPending,
        Self::ResolutionRejected,
        Self::AcceptanceReminder,
        Self::AccessHandoff,
        Self::PublicationFollowup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CallPublished => "call_published",
            Self::ApplicationReceived => "application_received",
            Self::FeasibilityRequest => "feasibility_request",
            Self::FeasibilityReminder => "feasibility_reminder",
            Self::FeasibilityRejected => "feasibility_rejected",
            Self::EvaluationAssigned => "evaluation_assigned",
            Self::EvaluationReminder => "evaluation_reminder",
            Self::EvaluationsComplete => "evaluations_complete",
            Self::ResolutionAccepted => "resolution_accepted",
            Self::ResolutionPending => "resolution_pending",
            Self::ResolutionRejected => "resolution_rejected",
            Self::AcceptanceReminder => "acceptance_reminder",
            Self::AccessHandoff => "access_handoff",
            Self::PublicationFollowup => "publication_followup",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Preference switch that gates this kind, if any.
    ///
    /// Reminders need both `reminders` and the topic switch; see
    /// `NotificationPreference::allows`.
    pub fn topic(self) -> Option<NotificationTopic> {
        match self {
            Self::CallPublished => Some(NotificationTopic::CallPublished),
            Self::FeasibilityRequest | Self::FeasibilityReminder => {
                Some(NotificationTopic::FeasibilityRequests)
            }
            Self::EvaluationAssigned | Self::EvaluationReminder => {
                Some(NotificationTopic::EvaluationAssigned)
            }
            Self::EvaluationsComplete
            | Self::AcceptanceReminder
            | Self::PublicationFollowup => Some(NotificationTopic::ApplicationUpdates),
            // Transactional mails always go out.
            Self::ApplicationReceived
            | Self::FeasibilityRejected
            | Self::ResolutionAccepted
            | Self::ResolutionPending
            | Self::ResolutionRejected
            | Self::AccessHandoff => None,
        }
    }

    pub fn is_reminder(self) -> bool {
        matches!(
            self,
            Self::FeasibilityReminder | Self::EvaluationReminder | Self::AcceptanceReminder
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Queued,
    Sent,
    Failed,
}

impl EmailStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailLog {
    pub id: Uuid,
    pub kind: EmailKind,
    pub recipient_user_id: Option<UserId>,
    pub recipient_email: String,
    pub subject: String,
    pub status: EmailStatus,
    pub related_application_id: Option<Uuid>,
    pub related_call_id: Option<Uuid>,
    pub related_evaluation_id: Option<Uuid>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTopic {
    CallPublished,
    ApplicationUpdates,
    EvaluationAssigned,
    FeasibilityRequests,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: UserId,
    pub notify_call_published: bool,
    pub notify_application_updates: bool,
    pub notify_evaluation_assigned: bool,
    pub notify_feasibility_requests: bool,
    pub notify_reminders: bool,
}

impl NotificationPreference {
    /// Everything enabled; used when a user never stored preferences.
    pub fn all_enabled(user_id: UserId) -> Self {
        Self {
            user_id,
            notify_call_published: true,
            notify_application_updates: true,
            notify_evaluation_assigned: true,
            notify_feasibility_requests: true,
            notify_reminders: true,
        }
    }

    /// Whether an email of `kind` may be queued for this user.
    pub fn allows(&self, kind: EmailKind) -> bool {
        if kind.is_reminder() && !self.notify_reminders {
            return false;
        }
        match kind.topic() {
            None => true,
            Some(NotificationTopic::CallPublished) => self.notify_call_published,
            Some(NotificationTopic::ApplicationUpdates) => self.notify_application_updates,
            Some(NotificationTopic::EvaluationAssigned) => self.notify_evaluation_assigned,
            Some(NotificationTopic::FeasibilityRequests) => self.notify_feasibility_requests,
        }
    }
}
