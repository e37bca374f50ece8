//! Access call periods and the equipment hours they offer.

use crate::model::directory::EquipmentId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CallId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Draft,
    /// Open for submissions.
    Open,
    /// Closed, under evaluation.
    Closed,
    Resolved,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// One call period. All instants are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    /// e.g. `COA-2025-01`; prefix of every application code in this call.
    pub code: String,
    pub title: String,
    pub status: CallStatus,
    pub submission_start: i64,
    pub submission_end: i64,
    pub evaluation_deadline: i64,
    pub execution_start: i64,
    pub execution_end: i64,
    pub published_at: Option<i64>,
    /// Set by resolution finalization; no further call-level resolutions.
    pub is_resolution_locked: bool,
}

impl Call {
    /// Creates a draft call with the given submission window.
    ///
    /// Evaluation and execution windows default to the submission end and can
    /// be adjusted before persistence.
    pub fn new(
        code: impl Into<String>,
        title: impl Into<String>,
        submission_start: i64,
        submission_end: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            title: title.into(),
            status: CallStatus::Draft,
            submission_start,
            submission_end,
            evaluation_deadline: submission_end,
            execution_start: submission_end,
            execution_end: submission_end,
            published_at: None,
            is_resolution_locked: false,
        }
    }

    /// Whether submissions are accepted at `now_ms`.
    pub fn is_open(&self, now_ms: i64) -> bool {
        self.status == CallStatus::Open
            && self.submission_start <= now_ms
            && now_ms <= self.submission_end
    }
}

/// Hours offered for one equipment within one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEquipmentAllocation {
    pub call_id: CallId,
    pub equipment_id: EquipmentId,
    pub hours_offered: f64,
}

#[cfg(test)]
mod tests {
    use super::{Call, CallStatus};

    #[test]
    fn draft_call_is_never_open() {
        let call = Call::new("COA-1", "t", 0, 100);
        assert!(!call.is_open(50));
    }

    #[test]
    fn open_call_respects_submission_window() {
        let mut call = Call::new("COA-1", "t", 10, 100);
        call.status = CallStatus::Open;
        assert!(!call.is_open(9));
        assert!(call.is_open(10));
        assert!(call.is_open(100));
        assert!(!call.is_open(101));
    }
}
