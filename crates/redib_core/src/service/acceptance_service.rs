//! Applicant acceptance, hand-off and the acceptance deadline sweep.
//!
//! # Invariants
//! - Only the applicant answers, once, before `acceptance_deadline`.
//! - An unanswered acceptance expires after its deadline with
//!   `accepted_by_applicant = false`.
//! - The pre-deadline reminder is sent at most once per application.

use crate::clock::{days, format_date};
use crate::db;
use crate::model::application::{Application, ApplicationId, RequestedAccess};
use crate::model::communication::EmailKind;
use crate::model::directory::{EquipmentId, UserId};
use crate::model::status::ApplicationStatus;
use crate::repo::application_repo::SqliteApplicationRepository;
use crate::repo::communication_repo::EmailLogQuery;
use crate::repo::directory_repo::SqliteDirectoryRepository;
use crate::repo::RepoError;
use crate::service::error::{ValidationError, WorkflowResult};
use crate::service::outbox::{Outbox, Related};
use log::{info, warn};
use rusqlite::Connection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptanceAnswer {
    Accept,
    Decline { reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeadlineSweepReport {
    pub reminders_sent: usize,
    pub expired: usize,
}

pub struct AcceptanceService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> AcceptanceService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Records the applicant's answer to an accepted application.
    pub fn respond(
        &self,
        application_id: ApplicationId,
        applicant_id: UserId,
        answer: AcceptanceAnswer,
        now_ms: i64,
    ) -> WorkflowResult<Application> {
        let tx = db::begin_immediate(self.conn)?;
        let apps = SqliteApplicationRepository::new(&tx);
        let mut application = apps.require_application(application_id)?;
        if application.applicant_id != applicant_id {
            return Err(ValidationError::NotApplicant {
                user_id: applicant_id,
            }
            .into());
        }
        if application.accepted_by_applicant.is_some() {
            return Err(ValidationError::AlreadyResponded {
                application_code: application.code,
            }
            .into());
        }
        if application.status != ApplicationStatus::Accepted {
            return Err(ValidationError::UnexpectedStatus {
                application_code: application.code,
                expected: ApplicationStatus::Accepted,
                actual: application.status,
            }
            .into());
        }
        if application
            .acceptance_deadline
            .is_some_and(|deadline| now_ms > deadline)
        {
            return Err(ValidationError::AcceptanceDeadlinePassed {
                application_code: application.code,
            }
            .into());
        }

        match answer {
            AcceptanceAnswer::Accept => {
                application.accepted_by_applicant = Some(true);
                application.accepted_at = Some(now_ms);
                let queued = queue_handoff(&tx, &application, now_ms)?;
                application.handoff_email_sent_at = Some(now_ms);
                apps.update_application(&application)?;
                info!(
                    "event=acceptance_answer module=acceptance status=ok application={} answer=accept handoff_emails={queued}",
                    application.code
                );
            }
            AcceptanceAnswer::Decline { reason } => {
                application.status = ApplicationStatus::DeclinedByApplicant;
                application.accepted_by_applicant = Some(false);
                application.append_resolution_note(&format!(
                    "DECLINED BY APPLICANT: {}",
                    reason.trim()
                ));
                apps.update_application(&application)?;
                info!(
                    "event=acceptance_answer module=acceptance status=ok application={} answer=decline",
                    application.code
                );
            }
        }
        tx.commit()?;
        Ok(application)
    }

    /// Reminds applicants close to their deadline and expires overdue ones.
    pub fn process_acceptance_deadlines(
        &self,
        now_ms: i64,
        reminder_days: u32,
    ) -> WorkflowResult<DeadlineSweepReport> {
        let awaiting: Vec<Application> = SqliteApplicationRepository::new(self.conn)
            .list_by_status(ApplicationStatus::Accepted)?
            .into_iter()
            .filter(Application::awaits_applicant_answer)
            .collect();

        let mut report = DeadlineSweepReport::default();
        let reminder_window = days(reminder_days);
        for application in awaiting {
            let Some(deadline) = application.acceptance_deadline else {
                warn!(
                    "event=deadline_sweep module=acceptance status=skipped application={} reason=no_deadline",
                    application.code
                );
                continue;
            };
            if now_ms > deadline {
                if self.expire_if_overdue(application.id, now_ms)? {
                    report.expired += 1;
                }
            } else if deadline - now_ms <= reminder_window && self.remind(&application, deadline, now_ms)? {
                report.reminders_sent += 1;
            }
        }
        info!(
            "event=deadline_sweep module=acceptance status=ok reminders={} expired={}",
            report.reminders_sent, report.expired
        );
        Ok(report)
    }

    /// Expires one unanswered acceptance whose deadline has passed.
    ///
    /// The row is re-read under the write lock; an answer recorded since the
    /// sweep listed it wins and `Ok(false)` is returned.
    pub fn expire_if_overdue(&self, application_id: ApplicationId, now_ms: i64) -> WorkflowResult<bool> {
        let tx = db::begin_immediate(self.conn)?;
        let apps = SqliteApplicationRepository::new(&tx);
        let mut application = apps.require_application(application_id)?;
        let deadline = match application.acceptance_deadline {
            Some(deadline) if application.awaits_applicant_answer() && now_ms > deadline => deadline,
            _ => {
                info!(
                    "event=application_expired module=acceptance status=skipped application={} app_status={}",
                    application.code, application.status
                );
                return Ok(false);
            }
        };

        application.status = ApplicationStatus::Expired;
        application.accepted_by_applicant = Some(false);
        application.append_resolution_note(&format!(
            "AUTO-EXPIRED: no response by {}",
            format_date(deadline)
        ));
        apps.update_application(&application)?;
        tx.commit()?;
        info!(
            "event=application_expired module=acceptance status=ok application={}",
            application.code
        );
        Ok(true)
    }

    fn remind(&self, application: &Application, deadline: i64, now_ms: i64) -> WorkflowResult<bool> {
        let outbox = Outbox::new(self.conn);
        let already = outbox.comms().exists(&EmailLogQuery {
            kind: Some(EmailKind::AcceptanceReminder),
            application_id: Some(application.id),
            ..EmailLogQuery::default()
        })?;
        if already {
            return Ok(false);
        }
        let applicant = SqliteDirectoryRepository::new(self.conn).require_user(application.applicant_id)?;
        Ok(outbox.queue(
            EmailKind::AcceptanceReminder,
            &applicant,
            format!(
                "[ReDIB] Reminder: confirm access for {} by {}",
                application.code,
                format_date(deadline)
            ),
            Related::application(application.id),
            now_ms,
        )?)
    }

    /// Records that one requested equipment session took place.
    pub fn mark_equipment_completed(
        &self,
        application_id: ApplicationId,
        equipment_id: EquipmentId,
        user_id: UserId,
        actual_hours: f64,
        now_ms: i64,
    ) -> WorkflowResult<RequestedAccess> {
        if !actual_hours.is_finite() || actual_hours < 0.0 {
            return Err(ValidationError::InvalidHours(actual_hours).into());
        }
        let tx = db::begin_immediate(self.conn)?;
        let apps = SqliteApplicationRepository::new(&tx);
        let directory = SqliteDirectoryRepository::new(&tx);

        let application = apps.require_application(application_id)?;
        if application.status != ApplicationStatus::Accepted
            || application.accepted_by_applicant != Some(true)
        {
            return Err(ValidationError::UnexpectedStatus {
                application_code: application.code,
                expected: ApplicationStatus::Accepted,
                actual: application.status,
            }
            .into());
        }
        let mut access = apps
            .get_requested_access(application.id, equipment_id)?
            .ok_or(ValidationError::EquipmentNotRequested(equipment_id))?;
        let equipment = directory
            .get_equipment(equipment_id)?
            .ok_or_else(|| RepoError::not_found("equipment", equipment_id))?;
        if user_id != application.applicant_id
            && !directory.is_active_node_coordinator(user_id, equipment.node_id)?
        {
            let node = directory.require_node(equipment.node_id)?;
            return Err(ValidationError::WrongNodeCoordinator {
                user_id,
                node_code: node.code,
            }
            .into());
        }

        access.is_completed = true;
        access.completed_by = Some(user_id);
        access.completed_at = Some(now_ms);
        access.actual_hours_used = Some(actual_hours);
        apps.update_requested_access(&access)?;
        tx.commit()?;
        info!(
            "event=equipment_completed module=acceptance status=ok application={} equipment_id={equipment_id}",
            application.code
        );
        Ok(access)
    }
}

/// Hand-off email to the applicant and every involved node's coordinators.
fn queue_handoff(conn: &Connection, application: &Application, now_ms: i64) -> WorkflowResult<usize> {
    let directory = SqliteDirectoryRepository::new(conn);
    let outbox = Outbox::new(conn);
    let related = Related::application(application.id);
    let subject = format!("[ReDIB] Access hand-off for {}", application.code);

    let applicant = directory.require_user(application.applicant_id)?;
    let mut queued = usize::from(outbox.queue(
        EmailKind::AccessHandoff,
        &applicant,
        subject.as_str(),
        related,
        now_ms,
    )?);
    for node in SqliteApplicationRepository::new(conn).involved_nodes(application.id)? {
        let coordinators = directory.node_coordinators(node.node_id)?;
        queued += outbox.queue_all(EmailKind::AccessHandoff, &coordinators, &subject, related, now_ms)?;
    }
    Ok(queued)
}
