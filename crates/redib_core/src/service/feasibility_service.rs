//! Per-node technical feasibility gate between submission and evaluation.

use crate::clock::days;
use crate::db;
use crate::model::application::{ApplicationId, FeasibilityReview};
use crate::model::communication::EmailKind;
use crate::model::directory::{NodeId, UserId};
use crate::model::status::ApplicationStatus;
use crate::repo::application_repo::SqliteApplicationRepository;
use crate::repo::communication_repo::EmailLogQuery;
use crate::repo::directory_repo::SqliteDirectoryRepository;
use crate::service::error::{ValidationError, WorkflowResult};
use crate::service::outbox::{Outbox, Related};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeasibilityOutcome {
    pub review: FeasibilityReview,
    /// New application status once the last pending review was recorded.
    pub concluded: Option<ApplicationStatus>,
}

pub struct FeasibilityService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> FeasibilityService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn record_feasibility(
        &self,
        application_id: ApplicationId,
        node_id: NodeId,
        reviewer_id: UserId,
        is_feasible: bool,
        comments: &str,
        now_ms: i64,
    ) -> WorkflowResult<FeasibilityOutcome> {
        let tx = db::begin_immediate(self.conn)?;
        let apps = SqliteApplicationRepository::new(&tx);
        let directory = SqliteDirectoryRepository::new(&tx);

        let node = directory.require_node(node_id)?;
        if !directory.is_active_node_coordinator(reviewer_id, node.id)? {
            return Err(ValidationError::WrongNodeCoordinator {
                user_id: reviewer_id,
                node_code: node.code,
            }
            .into());
        }
        let mut application = apps.require_application(application_id)?;
        if application.status != ApplicationStatus::UnderFeasibilityReview {
            return Err(ValidationError::UnexpectedStatus {
                application_code: application.code,
                expected: ApplicationStatus::UnderFeasibilityReview,
                actual: application.status,
            }
            .into());
        }
        let Some(mut review) = apps.feasibility_review_for(application.id, node.id)? else {
            return Err(ValidationError::NodeNotInvolved {
                node_code: node.code,
            }
            .into());
        };
        if review.is_feasible.is_some() {
            return Err(ValidationError::AlreadyReviewed {
                application_code: application.code,
                node_code: node.code,
            }
            .into());
        }

        review.reviewer_id = Some(reviewer_id);
        review.is_feasible = Some(is_feasible);
        review.comments = comments.trim().to_string();
        review.reviewed_at = Some(now_ms);
        apps.update_feasibility_review(&review)?;
        info!(
            "event=feasibility_recorded module=feasibility status=ok application={} node={} feasible={is_feasible}",
            application.code, node.code
        );

        let reviews = apps.feasibility_reviews(application.id)?;
        let concluded = if reviews.iter().any(|row| row.is_feasible.is_none()) {
            None
        } else if reviews.iter().any(|row| row.is_feasible == Some(false)) {
            application.status = ApplicationStatus::RejectedFeasibility;
            apps.update_application(&application)?;
            let applicant = directory.require_user(application.applicant_id)?;
            Outbox::new(&tx).queue(
                EmailKind::FeasibilityRejected,
                &applicant,
                format!("[ReDIB] Application {} not technically feasible", application.code),
                Related::application(application.id),
                now_ms,
            )?;
            Some(application.status)
        } else {
            application.status = ApplicationStatus::PendingEvaluation;
            apps.update_application(&application)?;
            Some(application.status)
        };
        tx.commit()?;

        Ok(FeasibilityOutcome { review, concluded })
    }

    /// Reminds node coordinators of reviews pending since `after_days`,
    /// at most once per `interval_days` per coordinator.
    pub fn send_feasibility_reminders(
        &self,
        now_ms: i64,
        after_days: u32,
        interval_days: u32,
    ) -> WorkflowResult<usize> {
        let apps = SqliteApplicationRepository::new(self.conn);
        let directory = SqliteDirectoryRepository::new(self.conn);
        let outbox = Outbox::new(self.conn);
        let reminded_since = now_ms - days(interval_days);

        let mut queued = 0;
        for review in apps.pending_feasibility_reviews(now_ms - days(after_days))? {
            let application = apps.require_application(review.application_id)?;
            let subject = format!("[ReDIB] Reminder: feasibility review of {}", application.code);
            for coordinator in directory.node_coordinators(review.node_id)? {
                let recent = outbox.comms().exists(&EmailLogQuery {
                    kind: Some(EmailKind::FeasibilityReminder),
                    application_id: Some(application.id),
                    recipient_user_id: Some(coordinator.id),
                    since: Some(reminded_since),
                    ..EmailLogQuery::default()
                })?;
                if recent {
                    continue;
                }
                if outbox.queue(
                    EmailKind::FeasibilityReminder,
                    &coordinator,
                    subject.as_str(),
                    Related::application(application.id),
                    now_ms,
                )? {
                    queued += 1;
                }
            }
        }
        info!("event=feasibility_reminders module=feasibility status=ok queued={queued}");
        Ok(queued)
    }

    pub fn reviews_for(&self, application_id: ApplicationId) -> WorkflowResult<Vec<FeasibilityReview>> {
        Ok(SqliteApplicationRepository::new(self.conn).feasibility_reviews(application_id)?)
    }
}
