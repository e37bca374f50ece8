//! Resolution notification collaborator.
//!
//! Called after the aggregation transaction commits. Failures are logged by
//! the caller and never roll back the resolution.

use crate::clock::now_epoch_ms;
use crate::model::application::ApplicationId;
use crate::model::communication::EmailKind;
use crate::model::status::Resolution;
use crate::repo::application_repo::SqliteApplicationRepository;
use crate::repo::directory_repo::SqliteDirectoryRepository;
use crate::service::error::WorkflowResult;
use crate::service::outbox::{Outbox, Related};
use rusqlite::Connection;

pub trait Notifier {
    /// Informs the applicant of the final resolution of `application_id`.
    fn notify_resolution(&self, application_id: ApplicationId) -> WorkflowResult<()>;
}

/// Queues the resolution email matching the stored resolution.
pub struct EmailNotifier<'conn> {
    conn: &'conn Connection,
}

impl<'conn> EmailNotifier<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl Notifier for EmailNotifier<'_> {
    fn notify_resolution(&self, application_id: ApplicationId) -> WorkflowResult<()> {
        let apps = SqliteApplicationRepository::new(self.conn);
        let application = apps.require_application(application_id)?;
        let Some(resolution) = application.resolution else {
            return Ok(());
        };
        let applicant = SqliteDirectoryRepository::new(self.conn).require_user(application.applicant_id)?;
        let (kind, verb) = resolution_email(resolution);
        Outbox::new(self.conn).queue(
            kind,
            &applicant,
            format!("[ReDIB] Application {} {verb}", application.code),
            Related::application(application.id),
            now_epoch_ms(),
        )?;
        Ok(())
    }
}

/// Notifier that drops every notification.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify_resolution(&self, _application_id: ApplicationId) -> WorkflowResult<()> {
        Ok(())
    }
}

pub(crate) fn resolution_email(resolution: Resolution) -> (EmailKind, &'static str) {
    match resolution {
        Resolution::Accepted => (EmailKind::ResolutionAccepted, "accepted"),
        Resolution::Pending => (EmailKind::ResolutionPending, "placed on the waiting list"),
        Resolution::Rejected => (EmailKind::ResolutionRejected, "not accepted"),
    }
}
