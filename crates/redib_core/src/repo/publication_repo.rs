//! Reported publications.

use super::{bool_to_int, get_bool, get_opt_uuid, get_uuid, opt_uuid_text, RepoError, RepoResult};
use crate::model::application::ApplicationId;
use crate::model::directory::UserId;
use crate::model::publication::{Publication, PublicationId};
use rusqlite::{params, Connection, Row};

const PUBLICATION_SELECT_SQL: &str = "SELECT
    p.id,
    p.application_id,
    p.title,
    p.authors,
    p.doi,
    p.journal,
    p.publication_date,
    p.publication_year,
    p.acknowledged,
    p.acknowledgment_text,
    p.reported_by,
    p.reported_at,
    p.verified
FROM publications p";

pub struct SqlitePublicationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePublicationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn create_publication(&self, publication: &Publication) -> RepoResult<PublicationId> {
        self.conn.execute(
            "INSERT INTO publications (
                id, application_id, title, authors, doi, journal, publication_date,
                publication_year, acknowledged, acknowledgment_text, reported_by,
                reported_at, verified
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
            params![
                publication.id.to_string(),
                publication.application_id.to_string(),
                publication.title.as_str(),
                publication.authors.as_str(),
                publication.doi.as_str(),
                publication.journal.as_str(),
                publication.publication_date.as_deref(),
                publication.publication_year,
                bool_to_int(publication.acknowledged),
                publication.acknowledgment_text.as_str(),
                opt_uuid_text(publication.reported_by),
                publication.reported_at,
                bool_to_int(publication.verified),
            ],
        )?;
        Ok(publication.id)
    }

    pub fn set_verified(&self, id: PublicationId, verified: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE publications SET verified = ?1 WHERE id = ?2;",
            params![bool_to_int(verified), id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("publication", id));
        }
        Ok(())
    }

    pub fn get_publication(&self, id: PublicationId) -> RepoResult<Option<Publication>> {
        let mut found = self.query(
            &format!("{PUBLICATION_SELECT_SQL} WHERE p.id = ?1;"),
            &[id.to_string()],
        )?;
        Ok(found.pop())
    }

    pub fn for_application(&self, application_id: ApplicationId) -> RepoResult<Vec<Publication>> {
        self.query(
            &format!(
                "{PUBLICATION_SELECT_SQL} WHERE p.application_id = ?1 ORDER BY p.reported_at ASC, p.id ASC;"
            ),
            &[application_id.to_string()],
        )
    }

    /// Publications attached to any application owned by `applicant_id`.
    pub fn for_applicant(&self, applicant_id: UserId) -> RepoResult<Vec<Publication>> {
        self.query(
            &format!(
                "{PUBLICATION_SELECT_SQL}
                 JOIN applications a ON a.id = p.application_id
                 WHERE a.applicant_id = ?1
                 ORDER BY p.reported_at DESC, p.id ASC;"
            ),
            &[applicant_id.to_string()],
        )
    }

    pub fn has_publication(&self, application_id: ApplicationId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM publications WHERE application_id = ?1);",
            [application_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn query(&self, sql: &str, args: &[String]) -> RepoResult<Vec<Publication>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut publications = Vec::new();
        while let Some(row) = rows.next()? {
            publications.push(parse_publication_row(row)?);
        }
        Ok(publications)
    }
}

fn parse_publication_row(row: &Row<'_>) -> RepoResult<Publication> {
    Ok(Publication {
        id: get_uuid(row, "id")?,
        application_id: get_uuid(row, "application_id")?,
        title: row.get("title")?,
        authors: row.get("authors")?,
        doi: row.get("doi")?,
        journal: row.get("journal")?,
        publication_date: row.get("publication_date")?,
        publication_year: row.get("publication_year")?,
        acknowledged: get_bool(row, "acknowledged")?,
        acknowledgment_text: row.get("acknowledgment_text")?,
        reported_by: get_opt_uuid(row, "reported_by")?,
        reported_at: row.get("reported_at")?,
        verified: get_bool(row, "verified")?,
    })
}
