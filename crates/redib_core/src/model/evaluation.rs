//! Blind peer evaluation record and score math.
//!
//! # Invariants
//! - Each criterion is scored on a 0..=2 scale.
//! - `total_score` is the sum of all six criteria (max 12), present only when
//!   every criterion is scored.
//! - `completed_at` is stamped once, the first time all criteria are scored.

use crate::model::application::ApplicationId;
use crate::model::directory::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EvaluationId = Uuid;

/// Highest score for one criterion.
pub const MAX_CRITERION_SCORE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approved,
    Denied,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// Six criterion scores; `None` while not yet scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionScores {
    /// Scientific and technical relevance.
    pub quality_originality: Option<u8>,
    pub methodology_design: Option<u8>,
    pub expected_contributions: Option<u8>,
    /// Timeliness and impact.
    pub knowledge_advancement: Option<u8>,
    pub social_economic_impact: Option<u8>,
    pub exploitation_dissemination: Option<u8>,
}

impl CriterionScores {
    pub fn as_array(&self) -> [Option<u8>; 6] {
        [
            self.quality_originality,
            self.methodology_design,
            self.expected_contributions,
            self.knowledge_advancement,
            self.social_economic_impact,
            self.exploitation_dissemination,
        ]
    }

    /// First score above `MAX_CRITERION_SCORE`, if any.
    pub fn out_of_range(&self) -> Option<u8> {
        self.as_array()
            .into_iter()
            .flatten()
            .find(|score| *score > MAX_CRITERION_SCORE)
    }

    /// Sum of all criteria, or `None` while any is missing.
    pub fn total(&self) -> Option<u8> {
        self.as_array()
            .into_iter()
            .try_fold(0u8, |sum, score| score.map(|value| sum + value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub application_id: ApplicationId,
    pub evaluator_id: UserId,
    pub scores: CriterionScores,
    pub recommendation: Option<Recommendation>,
    pub total_score: Option<u8>,
    pub comments: String,
    pub assigned_at: i64,
    pub completed_at: Option<i64>,
}

impl Evaluation {
    pub fn assigned(application_id: ApplicationId, evaluator_id: UserId, assigned_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_id,
            evaluator_id,
            scores: CriterionScores::default(),
            recommendation: None,
            total_score: None,
            comments: String::new(),
            assigned_at,
            completed_at: None,
        }
    }

    /// Recomputes `total_score` and stamps `completed_at` on first completion.
    pub fn recompute(&mut self, now_ms: i64) {
        self.total_score = self.scores.total();
        if self.total_score.is_some() && self.completed_at.is_none() {
            self.completed_at = Some(now_ms);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{CriterionScores, Evaluation};
    use uuid::Uuid;

    fn full(score: u8) -> CriterionScores {
        CriterionScores {
            quality_originality: Some(score),
            methodology_design: Some(score),
            expected_contributions: Some(score),
            knowledge_advancement: Some(score),
            social_economic_impact: Some(score),
            exploitation_dissemination: Some(score),
        }
    }

    #[test]
    fn total_is_sum_not_average() {
        assert_eq!(full(2).total(), Some(12));
        assert_eq!(full(1).total(), Some(6));
    }

    #[test]
    fn partial_scores_have_no_total() {
        let mut scores = full(2);
        scores.methodology_design = None;
        assert_eq!(scores.total(), None);
    }

    #[test]
    fn completion_is_stamped_once() {
        let mut evaluation = Evaluation::assigned(Uuid::new_v4(), Uuid::new_v4(), 1);
        evaluation.recompute(5);
        assert!(!evaluation.is_complete());

        evaluation.scores = full(1);
        evaluation.recompute(10);
        assert_eq!(evaluation.completed_at, Some(10));

        evaluation.recompute(20);
        assert_eq!(evaluation.completed_at, Some(10));
    }

    #[test]
    fn out_of_range_detects_invalid_criterion() {
        let mut scores = full(1);
        scores.social_economic_impact = Some(3);
        assert_eq!(scores.out_of_range(), Some(3));
    }
}
