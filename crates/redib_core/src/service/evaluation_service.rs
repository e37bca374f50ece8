//! Blind peer evaluation: assignment, scoring and completion.
//!
//! # Responsibility
//! - Assign evaluators without conflicts of interest.
//! - Accept score submissions until completion or the call deadline.
//! - Move an application to `evaluated` once every evaluation is complete.
//!
//! # Invariants
//! - An evaluator never evaluates an applicant from the same organization.
//! - `final_score` is the mean of completed evaluation totals.
//! - Evaluators only see the blind projection of an application.

use crate::clock::{days, format_date, DAY_MS};
use crate::db;
use crate::model::application::{Application, ApplicationId};
use crate::model::call::{Call, CallId, CallStatus};
use crate::model::communication::EmailKind;
use crate::model::directory::{User, UserId};
use crate::model::evaluation::{CriterionScores, Evaluation, EvaluationId, Recommendation};
use crate::model::status::ApplicationStatus;
use crate::repo::application_repo::SqliteApplicationRepository;
use crate::repo::call_repo::SqliteCallRepository;
use crate::repo::communication_repo::EmailLogQuery;
use crate::repo::directory_repo::{EvaluatorCandidate, SqliteDirectoryRepository};
use crate::repo::evaluation_repo::SqliteEvaluationRepository;
use crate::service::error::{ValidationError, WorkflowResult};
use crate::service::outbox::{Outbox, Related};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::Connection;

/// Application as shown to evaluators: no applicant or project identity.
#[derive(Debug, Clone, PartialEq)]
pub struct BlindApplication {
    pub code: String,
    pub call_id: CallId,
    pub brief_description: String,
    pub specialization_area: Option<String>,
    pub scientific_relevance: String,
    pub methodology_description: String,
    pub expected_contributions: String,
    pub impact_strengths: String,
    pub uses_animals: bool,
    pub uses_humans: bool,
    /// `(equipment_name, hours_requested)`.
    pub requested: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationProgress {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    /// Rounded to one decimal.
    pub percentage: f64,
    pub all_complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSubmission {
    pub evaluation: Evaluation,
    /// Set once this submission completed the last evaluation.
    pub final_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallAssignmentReport {
    pub applications: usize,
    pub evaluations: usize,
    pub call_closed: bool,
}

pub struct EvaluationService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> EvaluationService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Assigns up to `count` new evaluators to one application.
    pub fn assign_evaluators<R: Rng + ?Sized>(
        &self,
        application_id: ApplicationId,
        count: usize,
        rng: &mut R,
        now_ms: i64,
    ) -> WorkflowResult<Vec<Evaluation>> {
        let tx = db::begin_immediate(self.conn)?;
        let application = SqliteApplicationRepository::new(&tx).require_application(application_id)?;
        let assigned = assign_in_tx(&tx, application, count, rng, now_ms)?;
        tx.commit()?;
        Ok(assigned)
    }

    /// Assigns evaluators to every `pending_evaluation` application of a call
    /// and closes the call if it is still open.
    pub fn assign_evaluators_to_call<R: Rng + ?Sized>(
        &self,
        call_id: CallId,
        count: usize,
        rng: &mut R,
        now_ms: i64,
    ) -> WorkflowResult<CallAssignmentReport> {
        let tx = db::begin_immediate(self.conn)?;
        let calls = SqliteCallRepository::new(&tx);
        let mut call = calls.require_call(call_id)?;
        let mut report = CallAssignmentReport::default();
        if call.status == CallStatus::Open {
            call.status = CallStatus::Closed;
            calls.update_call(&call)?;
            report.call_closed = true;
        }

        let pending = SqliteApplicationRepository::new(&tx)
            .list_for_call(call_id, Some(ApplicationStatus::PendingEvaluation))?;
        for application in pending {
            let assigned = assign_in_tx(&tx, application, count, rng, now_ms)?;
            report.applications += 1;
            report.evaluations += assigned.len();
        }
        tx.commit()?;
        info!(
            "event=evaluators_assign_call module=evaluation status=ok call={} applications={} evaluations={}",
            call.code, report.applications, report.evaluations
        );
        Ok(report)
    }

    /// Saves scores; partial saves are allowed until completion.
    pub fn submit_evaluation(
        &self,
        evaluation_id: EvaluationId,
        evaluator_id: UserId,
        scores: CriterionScores,
        recommendation: Option<Recommendation>,
        comments: &str,
        now_ms: i64,
    ) -> WorkflowResult<EvaluationSubmission> {
        let tx = db::begin_immediate(self.conn)?;
        let evaluations = SqliteEvaluationRepository::new(&tx);
        let apps = SqliteApplicationRepository::new(&tx);

        let mut evaluation = evaluations.require_evaluation(evaluation_id)?;
        if evaluation.evaluator_id != evaluator_id {
            return Err(ValidationError::NotAssignedEvaluator {
                user_id: evaluator_id,
            }
            .into());
        }
        let application = apps.require_application(evaluation.application_id)?;
        let call = SqliteCallRepository::new(&tx).require_call(application.call_id)?;
        if let Some(reason) = lock_reason(&evaluation, &call, now_ms) {
            return Err(ValidationError::EvaluationLocked { reason }.into());
        }
        if let Some(score) = scores.out_of_range() {
            return Err(ValidationError::ScoreOutOfRange(score).into());
        }

        evaluation.scores = scores;
        evaluation.recommendation = recommendation;
        evaluation.comments = comments.trim().to_string();
        evaluation.recompute(now_ms);
        evaluations.update_evaluation(&evaluation)?;

        let final_score = if evaluation.is_complete() {
            info!(
                "event=evaluation_complete module=evaluation status=ok application={} total={}",
                application.code,
                evaluation.total_score.unwrap_or_default()
            );
            complete_if_all_done(&tx, application, now_ms)?
        } else {
            None
        };
        tx.commit()?;
        Ok(EvaluationSubmission {
            evaluation,
            final_score,
        })
    }

    pub fn blind_view(&self, application_id: ApplicationId) -> WorkflowResult<BlindApplication> {
        let apps = SqliteApplicationRepository::new(self.conn);
        let application = apps.require_application(application_id)?;
        let requested = apps
            .requested_access(application.id)?
            .into_iter()
            .map(|detail| (detail.equipment_name, detail.access.hours_requested))
            .collect();
        Ok(BlindApplication {
            code: application.code,
            call_id: application.call_id,
            brief_description: application.brief_description,
            specialization_area: application.specialization_area,
            scientific_relevance: application.scientific_relevance,
            methodology_description: application.methodology_description,
            expected_contributions: application.expected_contributions,
            impact_strengths: application.impact_strengths,
            uses_animals: application.uses_animals,
            uses_humans: application.uses_humans,
            requested,
        })
    }

    pub fn evaluation_progress(&self, application_id: ApplicationId) -> WorkflowResult<EvaluationProgress> {
        let evaluations = SqliteEvaluationRepository::new(self.conn).for_application(application_id)?;
        Ok(progress_of(&evaluations))
    }

    /// Reminds evaluators of incomplete evaluations whose call deadline falls
    /// within `window_days`; each evaluation is reminded at most once a day.
    pub fn send_evaluation_reminders(&self, now_ms: i64, window_days: u32) -> WorkflowResult<usize> {
        let directory = SqliteDirectoryRepository::new(self.conn);
        let outbox = Outbox::new(self.conn);
        let due = SqliteEvaluationRepository::new(self.conn).due_between(now_ms, now_ms + days(window_days))?;

        let mut queued = 0;
        for item in due {
            let evaluation = &item.evaluation;
            let today = outbox.comms().exists(&EmailLogQuery {
                kind: Some(EmailKind::EvaluationReminder),
                evaluation_id: Some(evaluation.id),
                since: Some(now_ms - DAY_MS),
                ..EmailLogQuery::default()
            })?;
            if today {
                continue;
            }
            let evaluator = directory.require_user(evaluation.evaluator_id)?;
            if outbox.queue(
                EmailKind::EvaluationReminder,
                &evaluator,
                format!(
                    "[ReDIB] Reminder: evaluation of {} due {}",
                    item.application_code,
                    format_date(item.evaluation_deadline)
                ),
                Related {
                    application: Some(evaluation.application_id),
                    evaluation: Some(evaluation.id),
                    ..Related::default()
                },
                now_ms,
            )? {
                queued += 1;
            }
        }
        info!("event=evaluation_reminders module=evaluation status=ok queued={queued}");
        Ok(queued)
    }

    pub fn evaluations_for(&self, evaluator_id: UserId) -> WorkflowResult<Vec<Evaluation>> {
        Ok(SqliteEvaluationRepository::new(self.conn).for_evaluator(evaluator_id)?)
    }
}

/// Why an evaluation no longer accepts changes, if it does not.
pub fn lock_reason(evaluation: &Evaluation, call: &Call, now_ms: i64) -> Option<&'static str> {
    if evaluation.is_complete() {
        Some("completed")
    } else if now_ms > call.evaluation_deadline {
        Some("past_deadline")
    } else {
        None
    }
}

pub fn progress_of(evaluations: &[Evaluation]) -> EvaluationProgress {
    let total = evaluations.len();
    let completed = evaluations.iter().filter(|evaluation| evaluation.is_complete()).count();
    let percentage = if total == 0 {
        0.0
    } else {
        (completed as f64 * 1000.0 / total as f64).round() / 10.0
    };
    EvaluationProgress {
        total,
        completed,
        pending: total - completed,
        percentage,
        all_complete: total > 0 && completed == total,
    }
}

fn assign_in_tx<R: Rng + ?Sized>(
    conn: &Connection,
    mut application: Application,
    count: usize,
    rng: &mut R,
    now_ms: i64,
) -> WorkflowResult<Vec<Evaluation>> {
    if !matches!(
        application.status,
        ApplicationStatus::PendingEvaluation | ApplicationStatus::UnderEvaluation
    ) {
        return Err(ValidationError::UnexpectedStatus {
            application_code: application.code,
            expected: ApplicationStatus::PendingEvaluation,
            actual: application.status,
        }
        .into());
    }
    let directory = SqliteDirectoryRepository::new(conn);
    let evaluations = SqliteEvaluationRepository::new(conn);
    let applicant = directory.require_user(application.applicant_id)?;
    let already: Vec<UserId> = evaluations
        .for_application(application.id)?
        .into_iter()
        .map(|evaluation| evaluation.evaluator_id)
        .collect();

    let candidates: Vec<EvaluatorCandidate> = directory
        .active_evaluators()?
        .into_iter()
        .filter(|candidate| candidate.user.id != applicant.id)
        .filter(|candidate| !already.contains(&candidate.user.id))
        .filter(|candidate| !same_organization(&candidate.user, &applicant))
        .collect();
    let chosen = pick_evaluators(candidates, application.specialization_area.as_deref(), count, rng);
    if chosen.len() < count {
        warn!(
            "event=evaluators_assign module=evaluation status=skipped application={} wanted={count} available={}",
            application.code,
            chosen.len()
        );
    }

    let outbox = Outbox::new(conn);
    let subject = format!("[ReDIB] Evaluation assigned: {}", application.code);
    let mut assigned = Vec::with_capacity(chosen.len());
    for evaluator in chosen {
        let evaluation = Evaluation::assigned(application.id, evaluator.id, now_ms);
        evaluations.create_evaluation(&evaluation)?;
        outbox.queue(
            EmailKind::EvaluationAssigned,
            &evaluator,
            subject.as_str(),
            Related {
                application: Some(application.id),
                evaluation: Some(evaluation.id),
                ..Related::default()
            },
            now_ms,
        )?;
        assigned.push(evaluation);
    }

    if !assigned.is_empty() && application.status == ApplicationStatus::PendingEvaluation {
        application.status = ApplicationStatus::UnderEvaluation;
        SqliteApplicationRepository::new(conn).update_application(&application)?;
    }
    info!(
        "event=evaluators_assign module=evaluation status=ok application={} assigned={}",
        application.code,
        assigned.len()
    );
    Ok(assigned)
}

/// Area-matched evaluators first, each group in random order.
fn pick_evaluators<R: Rng + ?Sized>(
    candidates: Vec<EvaluatorCandidate>,
    area: Option<&str>,
    count: usize,
    rng: &mut R,
) -> Vec<User> {
    let (mut matched, mut others): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|candidate| area.is_some() && candidate.area.as_deref() == area);
    matched.shuffle(rng);
    others.shuffle(rng);
    matched
        .into_iter()
        .chain(others)
        .take(count)
        .map(|candidate| candidate.user)
        .collect()
}

fn same_organization(a: &User, b: &User) -> bool {
    match (a.organization.as_deref(), b.organization.as_deref()) {
        (Some(left), Some(right)) => {
            let left = left.trim();
            !left.is_empty() && left.eq_ignore_ascii_case(right.trim())
        }
        _ => false,
    }
}

fn complete_if_all_done(
    conn: &Connection,
    mut application: Application,
    now_ms: i64,
) -> WorkflowResult<Option<f64>> {
    let evaluations = SqliteEvaluationRepository::new(conn).for_application(application.id)?;
    if !progress_of(&evaluations).all_complete {
        return Ok(None);
    }
    let totals: Vec<f64> = evaluations
        .iter()
        .filter_map(|evaluation| evaluation.total_score.map(f64::from))
        .collect();
    let final_score = totals.iter().sum::<f64>() / totals.len() as f64;

    application.final_score = Some(final_score);
    if application.status == ApplicationStatus::UnderEvaluation {
        application.status = ApplicationStatus::Evaluated;
    }
    SqliteApplicationRepository::new(conn).update_application(&application)?;

    let coordinators = SqliteDirectoryRepository::new(conn).active_coordinators()?;
    Outbox::new(conn).queue_all(
        EmailKind::EvaluationsComplete,
        &coordinators,
        &format!("[ReDIB] Evaluations complete for {}", application.code),
        Related::application(application.id),
        now_ms,
    )?;
    info!(
        "event=application_evaluated module=evaluation status=ok application={} final_score={final_score:.2}",
        application.code
    );
    Ok(Some(final_score))
}
