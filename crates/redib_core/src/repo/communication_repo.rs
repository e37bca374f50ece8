//! Email log and notification preferences.

use super::{
    bool_to_int, get_bool, get_enum, get_opt_uuid, get_uuid, opt_uuid_text, RepoError, RepoResult,
};
use crate::model::communication::{EmailKind, EmailLog, EmailStatus, NotificationPreference};
use crate::model::directory::UserId;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const EMAIL_SELECT_SQL: &str = "SELECT
    id,
    kind,
    recipient_user_id,
    recipient_email,
    subject,
    status,
    related_application_id,
    related_call_id,
    related_evaluation_id,
    created_at
FROM email_logs";

/// Filter for dedup checks against the email log.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailLogQuery {
    pub kind: Option<EmailKind>,
    pub application_id: Option<Uuid>,
    pub evaluation_id: Option<Uuid>,
    pub recipient_user_id: Option<UserId>,
    /// Only entries created at or after this instant.
    pub since: Option<i64>,
}

pub struct SqliteCommunicationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCommunicationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn insert_email(&self, email: &EmailLog) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO email_logs (
                id, kind, recipient_user_id, recipient_email, subject, status,
                related_application_id, related_call_id, related_evaluation_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                email.id.to_string(),
                email.kind.as_str(),
                opt_uuid_text(email.recipient_user_id),
                email.recipient_email.as_str(),
                email.subject.as_str(),
                email.status.as_str(),
                opt_uuid_text(email.related_application_id),
                opt_uuid_text(email.related_call_id),
                opt_uuid_text(email.related_evaluation_id),
                email.created_at,
            ],
        )?;
        Ok(())
    }

    /// Marks a queued email as delivered or failed.
    pub fn set_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        error_message: &str,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE email_logs SET status = ?1, error_message = ?2 WHERE id = ?3;",
            params![status.as_str(), error_message, id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("email log", id));
        }
        Ok(())
    }

    pub fn count(&self, query: &EmailLogQuery) -> RepoResult<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM email_logs
             WHERE (?1 IS NULL OR kind = ?1)
               AND (?2 IS NULL OR related_application_id = ?2)
               AND (?3 IS NULL OR related_evaluation_id = ?3)
               AND (?4 IS NULL OR recipient_user_id = ?4)
               AND (?5 IS NULL OR created_at >= ?5);",
            params![
                query.kind.map(EmailKind::as_str),
                opt_uuid_text(query.application_id),
                opt_uuid_text(query.evaluation_id),
                opt_uuid_text(query.recipient_user_id),
                query.since,
            ],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn exists(&self, query: &EmailLogQuery) -> RepoResult<bool> {
        Ok(self.count(query)? > 0)
    }

    pub fn for_application(&self, application_id: Uuid) -> RepoResult<Vec<EmailLog>> {
        self.query(
            &format!(
                "{EMAIL_SELECT_SQL} WHERE related_application_id = ?1 ORDER BY created_at ASC, rowid ASC;"
            ),
            &[application_id.to_string()],
        )
    }

    pub fn for_kind(&self, kind: EmailKind) -> RepoResult<Vec<EmailLog>> {
        self.query(
            &format!("{EMAIL_SELECT_SQL} WHERE kind = ?1 ORDER BY created_at ASC, rowid ASC;"),
            &[kind.as_str().to_string()],
        )
    }

    fn query(&self, sql: &str, args: &[String]) -> RepoResult<Vec<EmailLog>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut emails = Vec::new();
        while let Some(row) = rows.next()? {
            emails.push(parse_email_row(row)?);
        }
        Ok(emails)
    }

    /// Stored preferences, or everything enabled when none were saved.
    pub fn preferences(&self, user_id: UserId) -> RepoResult<NotificationPreference> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, notify_call_published, notify_application_updates,
                    notify_evaluation_assigned, notify_feasibility_requests, notify_reminders
             FROM notification_preferences WHERE user_id = ?1;",
        )?;
        let mut rows = stmt.query([user_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(NotificationPreference {
                user_id: get_uuid(row, "user_id")?,
                notify_call_published: get_bool(row, "notify_call_published")?,
                notify_application_updates: get_bool(row, "notify_application_updates")?,
                notify_evaluation_assigned: get_bool(row, "notify_evaluation_assigned")?,
                notify_feasibility_requests: get_bool(row, "notify_feasibility_requests")?,
                notify_reminders: get_bool(row, "notify_reminders")?,
            }),
            None => Ok(NotificationPreference::all_enabled(user_id)),
        }
    }

    pub fn save_preferences(&self, prefs: &NotificationPreference) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO notification_preferences (
                user_id, notify_call_published, notify_application_updates,
                notify_evaluation_assigned, notify_feasibility_requests, notify_reminders
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (user_id) DO UPDATE SET
                notify_call_published = excluded.notify_call_published,
                notify_application_updates = excluded.notify_application_updates,
                notify_evaluation_assigned = excluded.notify_evaluation_assigned,
                notify_feasibility_requests = excluded.notify_feasibility_requests,
                notify_reminders = excluded.notify_reminders;",
            params![
                prefs.user_id.to_string(),
                bool_to_int(prefs.notify_call_published),
                bool_to_int(prefs.notify_application_updates),
                bool_to_int(prefs.notify_evaluation_assigned),
                bool_to_int(prefs.notify_feasibility_requests),
                bool_to_int(prefs.notify_reminders),
            ],
        )?;
        Ok(())
    }
}

fn parse_email_row(row: &Row<'_>) -> RepoResult<EmailLog> {
    Ok(EmailLog {
        id: get_uuid(row, "id")?,
        kind: get_enum(row, "kind", EmailKind::parse)?,
        recipient_user_id: get_opt_uuid(row, "recipient_user_id")?,
        recipient_email: row.get("recipient_email")?,
        subject: row.get("subject")?,
        status: get_enum(row, "status", EmailStatus::parse)?,
        related_application_id: get_opt_uuid(row, "related_application_id")?,
        related_call_id: get_opt_uuid(row, "related_call_id")?,
        related_evaluation_id: get_opt_uuid(row, "related_evaluation_id")?,
        created_at: row.get("created_at")?,
    })
}
