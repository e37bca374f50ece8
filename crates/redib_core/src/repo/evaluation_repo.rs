//! Evaluation assignments and scores.

use super::{get_uuid, map_insert_error, RepoError, RepoResult};
use crate::model::application::ApplicationId;
use crate::model::directory::UserId;
use crate::model::evaluation::{CriterionScores, Evaluation, EvaluationId, Recommendation};
use rusqlite::{params, Connection, Row};

const EVALUATION_SELECT_SQL: &str = "SELECT
    ev.id,
    ev.application_id,
    ev.evaluator_id,
    ev.score_quality_originality,
    ev.score_methodology_design,
    ev.score_expected_contributions,
    ev.score_knowledge_advancement,
    ev.score_social_economic_impact,
    ev.score_exploitation_dissemination,
    ev.recommendation,
    ev.total_score,
    ev.comments,
    ev.assigned_at,
    ev.completed_at
FROM evaluations ev";

/// Incomplete evaluation whose call deadline is approaching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueEvaluation {
    pub evaluation: Evaluation,
    pub application_code: String,
    pub evaluation_deadline: i64,
}

pub struct SqliteEvaluationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEvaluationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn create_evaluation(&self, evaluation: &Evaluation) -> RepoResult<EvaluationId> {
        self.conn
            .execute(
                "INSERT INTO evaluations (id, application_id, evaluator_id, assigned_at)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    evaluation.id.to_string(),
                    evaluation.application_id.to_string(),
                    evaluation.evaluator_id.to_string(),
                    evaluation.assigned_at,
                ],
            )
            .map_err(|err| {
                map_insert_error(err, || {
                    format!(
                        "evaluator {} on application {}",
                        evaluation.evaluator_id, evaluation.application_id
                    )
                })
            })?;
        Ok(evaluation.id)
    }

    pub fn update_evaluation(&self, evaluation: &Evaluation) -> RepoResult<()> {
        let scores = &evaluation.scores;
        let changed = self.conn.execute(
            "UPDATE evaluations
             SET
                score_quality_originality = ?1,
                score_methodology_design = ?2,
                score_expected_contributions = ?3,
                score_knowledge_advancement = ?4,
                score_social_economic_impact = ?5,
                score_exploitation_dissemination = ?6,
                recommendation = ?7,
                total_score = ?8,
                comments = ?9,
                completed_at = ?10
             WHERE id = ?11;",
            params![
                scores.quality_originality,
                scores.methodology_design,
                scores.expected_contributions,
                scores.knowledge_advancement,
                scores.social_economic_impact,
                scores.exploitation_dissemination,
                evaluation.recommendation.map(Recommendation::as_str),
                evaluation.total_score,
                evaluation.comments.as_str(),
                evaluation.completed_at,
                evaluation.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("evaluation", evaluation.id));
        }
        Ok(())
    }

    pub fn get_evaluation(&self, id: EvaluationId) -> RepoResult<Option<Evaluation>> {
        let mut evaluations = self.query(
            &format!("{EVALUATION_SELECT_SQL} WHERE ev.id = ?1;"),
            &[id.to_string()],
        )?;
        Ok(evaluations.pop())
    }

    pub fn require_evaluation(&self, id: EvaluationId) -> RepoResult<Evaluation> {
        self.get_evaluation(id)?
            .ok_or_else(|| RepoError::not_found("evaluation", id))
    }

    pub fn for_application(&self, application_id: ApplicationId) -> RepoResult<Vec<Evaluation>> {
        self.query(
            &format!(
                "{EVALUATION_SELECT_SQL} WHERE ev.application_id = ?1 ORDER BY ev.assigned_at ASC, ev.id ASC;"
            ),
            &[application_id.to_string()],
        )
    }

    pub fn for_evaluator(&self, evaluator_id: UserId) -> RepoResult<Vec<Evaluation>> {
        self.query(
            &format!(
                "{EVALUATION_SELECT_SQL} WHERE ev.evaluator_id = ?1 ORDER BY ev.assigned_at ASC, ev.id ASC;"
            ),
            &[evaluator_id.to_string()],
        )
    }

    /// Incomplete evaluations whose call deadline lies within `[from, until]`.
    pub fn due_between(&self, from: i64, until: i64) -> RepoResult<Vec<DueEvaluation>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                ev.id, ev.application_id, ev.evaluator_id,
                ev.score_quality_originality, ev.score_methodology_design,
                ev.score_expected_contributions, ev.score_knowledge_advancement,
                ev.score_social_economic_impact, ev.score_exploitation_dissemination,
                ev.recommendation, ev.total_score, ev.comments, ev.assigned_at, ev.completed_at,
                a.code AS application_code,
                c.evaluation_deadline AS evaluation_deadline
             FROM evaluations ev
             JOIN applications a ON a.id = ev.application_id
             JOIN calls c ON c.id = a.call_id
             WHERE ev.completed_at IS NULL
               AND c.evaluation_deadline >= ?1
               AND c.evaluation_deadline <= ?2
             ORDER BY a.code ASC, ev.id ASC;",
        )?;
        let mut rows = stmt.query([from, until])?;
        let mut due = Vec::new();
        while let Some(row) = rows.next()? {
            due.push(DueEvaluation {
                evaluation: parse_evaluation_row(row)?,
                application_code: row.get("application_code")?,
                evaluation_deadline: row.get("evaluation_deadline")?,
            });
        }
        Ok(due)
    }

    fn query(&self, sql: &str, args: &[String]) -> RepoResult<Vec<Evaluation>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut evaluations = Vec::new();
        while let Some(row) = rows.next()? {
            evaluations.push(parse_evaluation_row(row)?);
        }
        Ok(evaluations)
    }
}

fn parse_evaluation_row(row: &Row<'_>) -> RepoResult<Evaluation> {
    let recommendation = match row.get::<_, Option<String>>("recommendation")? {
        Some(value) => Some(Recommendation::parse(&value).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid value `{value}` in evaluations.recommendation"
            ))
        })?),
        None => None,
    };
    Ok(Evaluation {
        id: get_uuid(row, "id")?,
        application_id: get_uuid(row, "application_id")?,
        evaluator_id: get_uuid(row, "evaluator_id")?,
        scores: CriterionScores {
            quality_originality: row.get("score_quality_originality")?,
            methodology_design: row.get("score_methodology_design")?,
            expected_contributions: row.get("score_expected_contributions")?,
            knowledge_advancement: row.get("score_knowledge_advancement")?,
            social_economic_impact: row.get("score_social_economic_impact")?,
            exploitation_dissemination: row.get("score_exploitation_dissemination")?,
        },
        recommendation,
        total_score: row.get("total_score")?,
        comments: row.get("comments")?,
        assigned_at: row.get("assigned_at")?,
        completed_at: row.get("completed_at")?,
    })
}
