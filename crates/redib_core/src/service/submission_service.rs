//! Applicant-side drafting and submission.
//!
//! # Invariants
//! - Requested equipment can only change while the application is a draft.
//! - Submission opens one pending feasibility review per involved node.

use crate::db;
use crate::model::application::{Application, ApplicationId, FeasibilityReview, RequestedAccess};
use crate::model::call::CallStatus;
use crate::model::communication::EmailKind;
use crate::model::directory::{EquipmentId, UserId};
use crate::model::status::ApplicationStatus;
use crate::repo::application_repo::SqliteApplicationRepository;
use crate::repo::call_repo::SqliteCallRepository;
use crate::repo::directory_repo::SqliteDirectoryRepository;
use crate::repo::RepoError;
use crate::service::error::{ValidationError, WorkflowResult};
use crate::service::outbox::{Outbox, Related};
use log::info;
use rusqlite::Connection;

pub struct SubmissionService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SubmissionService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Persists a new draft and returns it with its generated code.
    pub fn create_draft(&self, mut application: Application) -> WorkflowResult<Application> {
        let call = SqliteCallRepository::new(self.conn).require_call(application.call_id)?;
        if call.status != CallStatus::Open {
            return Err(ValidationError::CallNotOpen {
                call_code: call.code,
            }
            .into());
        }
        SqliteDirectoryRepository::new(self.conn).require_user(application.applicant_id)?;

        application.status = ApplicationStatus::Draft;
        application.code = SqliteApplicationRepository::new(self.conn).create_application(&application)?;
        info!(
            "event=application_create module=submission status=ok application={} call={}",
            application.code, call.code
        );
        Ok(application)
    }

    /// Requests `hours` of one equipment, replacing an earlier request for it.
    pub fn add_requested_access(
        &self,
        application_id: ApplicationId,
        equipment_id: EquipmentId,
        hours: f64,
    ) -> WorkflowResult<()> {
        if !hours.is_finite() || hours < 0.0 {
            return Err(ValidationError::InvalidHours(hours).into());
        }
        let apps = SqliteApplicationRepository::new(self.conn);
        let application = apps.require_application(application_id)?;
        expect_draft(&application)?;
        SqliteDirectoryRepository::new(self.conn)
            .get_equipment(equipment_id)?
            .filter(|equipment| equipment.is_active)
            .ok_or_else(|| RepoError::not_found("equipment", equipment_id))?;
        apps.upsert_requested_access(&RequestedAccess::new(application_id, equipment_id, hours))?;
        Ok(())
    }

    pub fn remove_requested_access(
        &self,
        application_id: ApplicationId,
        equipment_id: EquipmentId,
    ) -> WorkflowResult<()> {
        let apps = SqliteApplicationRepository::new(self.conn);
        expect_draft(&apps.require_application(application_id)?)?;
        apps.remove_requested_access(application_id, equipment_id)?;
        Ok(())
    }

    /// Submits a draft and hands it to node feasibility review.
    pub fn submit(
        &self,
        application_id: ApplicationId,
        applicant_id: UserId,
        now_ms: i64,
    ) -> WorkflowResult<Application> {
        let tx = db::begin_immediate(self.conn)?;
        let apps = SqliteApplicationRepository::new(&tx);
        let directory = SqliteDirectoryRepository::new(&tx);

        let mut application = apps.require_application(application_id)?;
        if application.applicant_id != applicant_id {
            return Err(ValidationError::NotApplicant {
                user_id: applicant_id,
            }
            .into());
        }
        expect_draft(&application)?;
        let call = SqliteCallRepository::new(&tx).require_call(application.call_id)?;
        if !call.is_open(now_ms) {
            return Err(ValidationError::SubmissionClosed {
                call_code: call.code,
            }
            .into());
        }
        if !application.data_consent {
            return Err(ValidationError::IncompleteApplication("data consent not given").into());
        }
        if application.uses_animals && !application.has_animal_ethics {
            return Err(ValidationError::IncompleteApplication("animal ethics approval missing").into());
        }
        if application.uses_humans && !application.has_human_ethics {
            return Err(ValidationError::IncompleteApplication("human ethics approval missing").into());
        }
        let involved = apps.involved_nodes(application.id)?;
        if involved.is_empty() {
            return Err(ValidationError::IncompleteApplication("no equipment requested").into());
        }

        application.status = ApplicationStatus::Submitted;
        application.submitted_at = Some(now_ms);
        apps.update_application(&application)?;
        application.status = ApplicationStatus::UnderFeasibilityReview;
        apps.update_application(&application)?;

        let outbox = Outbox::new(&tx);
        let related = Related::application(application.id);
        let applicant = directory.require_user(application.applicant_id)?;
        outbox.queue(
            EmailKind::ApplicationReceived,
            &applicant,
            format!("[ReDIB] Application {} received", application.code),
            related,
            now_ms,
        )?;
        let subject = format!("[ReDIB] Feasibility review requested for {}", application.code);
        for node in &involved {
            apps.create_feasibility_review(&FeasibilityReview::pending(application.id, node.node_id, None))?;
            let coordinators = directory.node_coordinators(node.node_id)?;
            outbox.queue_all(
                EmailKind::FeasibilityRequest,
                &coordinators,
                &subject,
                related,
                now_ms,
            )?;
        }
        tx.commit()?;
        info!(
            "event=application_submit module=submission status=ok application={} nodes={}",
            application.code,
            involved.len()
        );
        Ok(application)
    }

    pub fn total_hours_requested(&self, application_id: ApplicationId) -> WorkflowResult<f64> {
        Ok(SqliteApplicationRepository::new(self.conn).total_hours_requested(application_id)?)
    }
}

fn expect_draft(application: &Application) -> Result<(), ValidationError> {
    if application.status == ApplicationStatus::Draft {
        return Ok(());
    }
    Err(ValidationError::UnexpectedStatus {
        application_code: application.code.clone(),
        expected: ApplicationStatus::Draft,
        actual: application.status,
    })
}
