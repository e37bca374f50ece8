//! Queues emails into the log, honoring recipient preferences.

use crate::model::communication::{EmailKind, EmailLog, EmailStatus};
use crate::model::directory::User;
use crate::repo::communication_repo::SqliteCommunicationRepository;
use crate::repo::RepoResult;
use log::debug;
use rusqlite::Connection;
use uuid::Uuid;

/// Records an email refers to.
#[derive(Debug, Clone, Copy, Default)]
pub struct Related {
    pub application: Option<Uuid>,
    pub call: Option<Uuid>,
    pub evaluation: Option<Uuid>,
}

impl Related {
    pub fn application(id: Uuid) -> Self {
        Self {
            application: Some(id),
            ..Self::default()
        }
    }

    pub fn call(id: Uuid) -> Self {
        Self {
            call: Some(id),
            ..Self::default()
        }
    }
}

pub struct Outbox<'conn> {
    comms: SqliteCommunicationRepository<'conn>,
}

impl<'conn> Outbox<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            comms: SqliteCommunicationRepository::new(conn),
        }
    }

    /// Queues one email; returns `false` when the recipient opted out.
    pub fn queue(
        &self,
        kind: EmailKind,
        recipient: &User,
        subject: impl Into<String>,
        related: Related,
        now_ms: i64,
    ) -> RepoResult<bool> {
        let prefs = self.comms.preferences(recipient.id)?;
        if !prefs.allows(kind) {
            debug!(
                "event=email_queue module=outbox status=skipped kind={} user_id={} reason=preference",
                kind.as_str(),
                recipient.id
            );
            return Ok(false);
        }
        let email = EmailLog {
            id: Uuid::new_v4(),
            kind,
            recipient_user_id: Some(recipient.id),
            recipient_email: recipient.email.clone(),
            subject: subject.into(),
            status: EmailStatus::Queued,
            related_application_id: related.application,
            related_call_id: related.call,
            related_evaluation_id: related.evaluation,
            created_at: now_ms,
        };
        self.comms.insert_email(&email)?;
        debug!(
            "event=email_queue module=outbox status=ok kind={} user_id={}",
            kind.as_str(),
            recipient.id
        );
        Ok(true)
    }

    /// Queues the same email to every recipient; returns how many were queued.
    pub fn queue_all<'u>(
        &self,
        kind: EmailKind,
        recipients: impl IntoIterator<Item = &'u User>,
        subject: &str,
        related: Related,
        now_ms: i64,
    ) -> RepoResult<usize> {
        let mut queued = 0;
        for recipient in recipients {
            if self.queue(kind, recipient, subject, related, now_ms)? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    pub fn comms(&self) -> &SqliteCommunicationRepository<'conn> {
        &self.comms
    }
}
