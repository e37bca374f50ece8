//! Publication reporting, verification and the follow-up sweep.

use crate::clock::days;
use crate::model::application::Application;
use crate::model::communication::EmailKind;
use crate::model::directory::{Role, UserId};
use crate::model::publication::{is_valid_doi, year_of, Publication, PublicationId};
use crate::model::status::ApplicationStatus;
use crate::repo::application_repo::SqliteApplicationRepository;
use crate::repo::communication_repo::EmailLogQuery;
use crate::repo::directory_repo::SqliteDirectoryRepository;
use crate::repo::publication_repo::SqlitePublicationRepository;
use crate::repo::RepoError;
use crate::service::error::{ValidationError, WorkflowResult};
use crate::service::outbox::{Outbox, Related};
use log::info;
use rusqlite::Connection;

pub struct PublicationService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> PublicationService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Stores a publication reported by the applicant of a completed access.
    pub fn submit_publication(
        &self,
        reporter_id: UserId,
        mut publication: Publication,
        now_ms: i64,
    ) -> WorkflowResult<Publication> {
        let application = SqliteApplicationRepository::new(self.conn)
            .require_application(publication.application_id)?;
        if application.applicant_id != reporter_id {
            return Err(ValidationError::NotApplicant {
                user_id: reporter_id,
            }
            .into());
        }
        if !accepted_by_applicant(&application) {
            return Err(ValidationError::UnexpectedStatus {
                application_code: application.code,
                expected: ApplicationStatus::Accepted,
                actual: application.status,
            }
            .into());
        }

        publication.doi = publication.doi.trim().to_string();
        if !publication.doi.is_empty() && !is_valid_doi(&publication.doi) {
            return Err(ValidationError::InvalidDoi(publication.doi).into());
        }
        if let Some(date) = publication.publication_date.as_deref() {
            if year_of(date).is_none() {
                return Err(ValidationError::InvalidDate(date.to_string()).into());
            }
        }
        publication.derive_year();
        publication.reported_by = Some(reporter_id);
        publication.reported_at = now_ms;
        publication.verified = false;

        SqlitePublicationRepository::new(self.conn).create_publication(&publication)?;
        info!(
            "event=publication_submit module=publication status=ok application={} has_doi={}",
            application.code,
            !publication.doi.is_empty()
        );
        Ok(publication)
    }

    pub fn verify_publication(
        &self,
        publication_id: PublicationId,
        coordinator_id: UserId,
        verified: bool,
    ) -> WorkflowResult<Publication> {
        let directory = SqliteDirectoryRepository::new(self.conn);
        if !directory.has_active_role(coordinator_id, Role::Coordinator)? {
            return Err(ValidationError::MissingRole {
                user_id: coordinator_id,
                role: Role::Coordinator,
            }
            .into());
        }
        let publications = SqlitePublicationRepository::new(self.conn);
        publications.set_verified(publication_id, verified)?;
        let publication = publications
            .get_publication(publication_id)?
            .ok_or_else(|| RepoError::not_found("publication", publication_id))?;
        Ok(publication)
    }

    pub fn publications_for_user(&self, user_id: UserId) -> WorkflowResult<Vec<Publication>> {
        Ok(SqlitePublicationRepository::new(self.conn).for_applicant(user_id)?)
    }

    /// Asks applicants whose hand-off happened `after_days` to
    /// `after_days + window_days` ago, and who reported nothing, for publications.
    pub fn send_publication_followups(
        &self,
        now_ms: i64,
        after_days: u32,
        window_days: u32,
    ) -> WorkflowResult<usize> {
        let newest = now_ms - days(after_days);
        let oldest = newest - days(window_days);
        let publications = SqlitePublicationRepository::new(self.conn);
        let directory = SqliteDirectoryRepository::new(self.conn);
        let outbox = Outbox::new(self.conn);

        let mut queued = 0;
        for application in SqliteApplicationRepository::new(self.conn).list_by_status(ApplicationStatus::Accepted)? {
            let Some(handoff) = application.handoff_email_sent_at else {
                continue;
            };
            if !accepted_by_applicant(&application) || handoff < oldest || handoff > newest {
                continue;
            }
            if publications.has_publication(application.id)? {
                continue;
            }
            let already = outbox.comms().exists(&EmailLogQuery {
                kind: Some(EmailKind::PublicationFollowup),
                application_id: Some(application.id),
                ..EmailLogQuery::default()
            })?;
            if already {
                continue;
            }
            let applicant = directory.require_user(application.applicant_id)?;
            if outbox.queue(
                EmailKind::PublicationFollowup,
                &applicant,
                format!("[ReDIB] Publications from access {}", application.code),
                Related::application(application.id),
                now_ms,
            )? {
                queued += 1;
            }
        }
        info!("event=publication_followup module=publication status=ok queued={queued}");
        Ok(queued)
    }
}

fn accepted_by_applicant(application: &Application) -> bool {
    application.status == ApplicationStatus::Accepted && application.accepted_by_applicant == Some(true)
}
