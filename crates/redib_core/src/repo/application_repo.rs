//! Applications and their per-equipment and per-node child records.
//!
//! # Responsibility
//! - Persist applications, requested access, feasibility reviews and node
//!   resolutions.
//! - Generate `{call_code}-{sequence:03}` codes on first insert.
//! - Validate every status write against the transition table.
//!
//! # Invariants
//! - `update_application` re-reads the stored status and rejects writes the
//!   transition table does not allow; nothing is written on rejection.
//! - Code generation retries on a code collision instead of failing the insert.

use super::{
    bool_to_int, get_bool, get_enum, get_opt_bool, get_opt_enum, get_opt_uuid, get_uuid,
    is_unique_violation, map_insert_error, opt_uuid_text, RepoError, RepoResult,
};
use crate::model::application::{
    Application, ApplicationId, ApplicationValidationError, FeasibilityReview, NodeResolution,
    RequestedAccess,
};
use crate::model::call::CallId;
use crate::model::directory::{EquipmentId, NodeId, UserId};
use crate::model::status::{ApplicationStatus, NodeDecision, Resolution};
use log::info;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};

const CODE_GENERATION_ATTEMPTS: usize = 5;

const APPLICATION_SELECT_SQL: &str = "SELECT
    a.id,
    a.call_id,
    a.applicant_id,
    a.code,
    a.status,
    a.brief_description,
    a.project_title,
    a.project_code,
    a.funding_agency,
    a.has_competitive_funding,
    a.specialization_area,
    a.scientific_relevance,
    a.methodology_description,
    a.expected_contributions,
    a.impact_strengths,
    a.uses_animals,
    a.has_animal_ethics,
    a.uses_humans,
    a.has_human_ethics,
    a.data_consent,
    a.final_score,
    a.resolution,
    a.resolution_date,
    a.resolution_comments,
    a.acceptance_deadline,
    a.accepted_by_applicant,
    a.accepted_at,
    a.handoff_email_sent_at,
    a.submitted_at
FROM applications a";

const REQUESTED_ACCESS_SELECT_SQL: &str = "SELECT
    ra.id,
    ra.application_id,
    ra.equipment_id,
    ra.hours_requested,
    ra.hours_approved,
    ra.hours_granted,
    ra.is_completed,
    ra.completed_by,
    ra.completed_at,
    ra.actual_hours_used
FROM requested_access ra";

const FEASIBILITY_SELECT_SQL: &str = "SELECT
    id, application_id, node_id, reviewer_id, is_feasible, comments, reviewed_at
FROM feasibility_reviews";

const NODE_RESOLUTION_SELECT_SQL: &str = "SELECT
    id, application_id, node_id, reviewer_id, resolution, comments, reviewed_at
FROM node_resolutions";

/// A node owning at least one piece of requested equipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvolvedNode {
    pub node_id: NodeId,
    pub code: String,
    pub name: String,
}

/// Requested access joined with its equipment and owning node.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedAccessDetail {
    pub access: RequestedAccess,
    pub equipment_name: String,
    pub node_id: NodeId,
}

pub struct SqliteApplicationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteApplicationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts a new application and returns its generated code.
    ///
    /// A non-empty `application.code` is kept as-is.
    pub fn create_application(&self, application: &Application) -> RepoResult<String> {
        application.validate()?;

        if !application.code.is_empty() {
            self.insert_application(application, &application.code)
                .map_err(|err| {
                    map_insert_error(err, || format!("application code `{}`", application.code))
                })?;
            return Ok(application.code.clone());
        }

        let call_code: String = self
            .conn
            .query_row(
                "SELECT code FROM calls WHERE id = ?1;",
                [application.call_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RepoError::not_found("call", application.call_id))?;

        let mut last_code = String::new();
        for attempt in 1..=CODE_GENERATION_ATTEMPTS {
            let sequence = self.next_sequence(&call_code)?;
            let code = format!("{call_code}-{sequence:03}");
            match self.insert_application(application, &code) {
                Ok(()) => return Ok(code),
                Err(err) if is_code_collision(&err) => {
                    info!(
                        "event=application_code_retry module=repo status=retry call_code={} attempt={}",
                        call_code, attempt
                    );
                    last_code = code;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(RepoError::Duplicate(format!(
            "application code `{last_code}` after {CODE_GENERATION_ATTEMPTS} attempts"
        )))
    }

    fn next_sequence(&self, call_code: &str) -> RepoResult<u32> {
        let pattern = Regex::new(&format!(r"^{}-(\d+)$", regex::escape(call_code)))
            .map_err(|err| RepoError::InvalidData(format!("call code pattern: {err}")))?;
        let mut stmt = self
            .conn
            .prepare("SELECT code FROM applications WHERE substr(code, 1, ?1) = ?2;")?;
        let prefix = format!("{call_code}-");
        let mut rows = stmt.query(params![prefix.chars().count() as i64, prefix])?;
        let mut highest = 0u32;
        while let Some(row) = rows.next()? {
            let code: String = row.get(0)?;
            if let Some(sequence) = pattern
                .captures(&code)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            {
                highest = highest.max(sequence);
            }
        }
        Ok(highest + 1)
    }

    fn insert_application(&self, app: &Application, code: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO applications (
                id, call_id, applicant_id, code, status, brief_description,
                project_title, project_code, funding_agency, has_competitive_funding,
                specialization_area, scientific_relevance, methodology_description,
                expected_contributions, impact_strengths, uses_animals, has_animal_ethics,
                uses_humans, has_human_ethics, data_consent, final_score, resolution,
                resolution_date, resolution_comments, acceptance_deadline,
                accepted_by_applicant, accepted_at, handoff_email_sent_at, submitted_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29
            );",
            params![
                app.id.to_string(),
                app.call_id.to_string(),
                app.applicant_id.to_string(),
                code,
                app.status.as_str(),
                app.brief_description.as_str(),
                app.project_title.as_str(),
                app.project_code.as_str(),
                app.funding_agency.as_str(),
                bool_to_int(app.has_competitive_funding),
                app.specialization_area.as_deref(),
                app.scientific_relevance.as_str(),
                app.methodology_description.as_str(),
                app.expected_contributions.as_str(),
                app.impact_strengths.as_str(),
                bool_to_int(app.uses_animals),
                bool_to_int(app.has_animal_ethics),
                bool_to_int(app.uses_humans),
                bool_to_int(app.has_human_ethics),
                bool_to_int(app.data_consent),
                app.final_score,
                app.resolution.map_or("", Resolution::as_str),
                app.resolution_date,
                app.resolution_comments.as_str(),
                app.acceptance_deadline,
                app.accepted_by_applicant.map(bool_to_int),
                app.accepted_at,
                app.handoff_email_sent_at,
                app.submitted_at,
            ],
        )?;
        Ok(())
    }

    /// Writes every mutable field, validating the status change first.
    pub fn update_application(&self, app: &Application) -> RepoResult<()> {
        app.validate()?;

        let (current, competitive_funding) = self.current_state(app.id)?;
        current.transition_to(app.status)?;
        if current != ApplicationStatus::Draft && competitive_funding != app.has_competitive_funding {
            return Err(ApplicationValidationError::CompetitiveFundingFrozen(current).into());
        }

        self.conn.execute(
            "UPDATE applications
             SET
                status = ?1,
                brief_description = ?2,
                project_title = ?3,
                project_code = ?4,
                funding_agency = ?5,
                has_competitive_funding = ?6,
                specialization_area = ?7,
                scientific_relevance = ?8,
                methodology_description = ?9,
                expected_contributions = ?10,
                impact_strengths = ?11,
                uses_animals = ?12,
                has_animal_ethics = ?13,
                uses_humans = ?14,
                has_human_ethics = ?15,
                data_consent = ?16,
                final_score = ?17,
                resolution = ?18,
                resolution_date = ?19,
                resolution_comments = ?20,
                acceptance_deadline = ?21,
                accepted_by_applicant = ?22,
                accepted_at = ?23,
                handoff_email_sent_at = ?24,
                submitted_at = ?25,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?26;",
            params![
                app.status.as_str(),
                app.brief_description.as_str(),
                app.project_title.as_str(),
                app.project_code.as_str(),
                app.funding_agency.as_str(),
                bool_to_int(app.has_competitive_funding),
                app.specialization_area.as_deref(),
                app.scientific_relevance.as_str(),
                app.methodology_description.as_str(),
                app.expected_contributions.as_str(),
                app.impact_strengths.as_str(),
                bool_to_int(app.uses_animals),
                bool_to_int(app.has_animal_ethics),
                bool_to_int(app.uses_humans),
                bool_to_int(app.has_human_ethics),
                bool_to_int(app.data_consent),
                app.final_score,
                app.resolution.map_or("", Resolution::as_str),
                app.resolution_date,
                app.resolution_comments.as_str(),
                app.acceptance_deadline,
                app.accepted_by_applicant.map(bool_to_int),
                app.accepted_at,
                app.handoff_email_sent_at,
                app.submitted_at,
                app.id.to_string(),
            ],
        )?;

        if current != app.status {
            info!(
                "event=status_transition module=repo status=ok application_code={} from={} to={}",
                app.code, current, app.status
            );
        }
        Ok(())
    }

    fn current_state(&self, id: ApplicationId) -> RepoResult<(ApplicationStatus, bool)> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT status, has_competitive_funding FROM applications WHERE id = ?1;",
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (text, competitive_funding) = row.ok_or_else(|| RepoError::not_found("application", id))?;
        let status = ApplicationStatus::parse(&text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid value `{text}` in applications.status"))
        })?;
        Ok((status, competitive_funding != 0))
    }

    pub fn get_application(&self, id: ApplicationId) -> RepoResult<Option<Application>> {
        self.query_one(
            &format!("{APPLICATION_SELECT_SQL} WHERE a.id = ?1;"),
            &id.to_string(),
        )
    }

    pub fn get_application_by_code(&self, code: &str) -> RepoResult<Option<Application>> {
        self.query_one(&format!("{APPLICATION_SELECT_SQL} WHERE a.code = ?1;"), code)
    }

    pub fn require_application(&self, id: ApplicationId) -> RepoResult<Application> {
        self.get_application(id)?
            .ok_or_else(|| RepoError::not_found("application", id))
    }

    fn query_one(&self, sql: &str, key: &str) -> RepoResult<Option<Application>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_application_row(row)?)),
            None => Ok(None),
        }
    }

    fn query_many(&self, sql: &str, args: &[Option<String>]) -> RepoResult<Vec<Application>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut applications = Vec::new();
        while let Some(row) = rows.next()? {
            applications.push(parse_application_row(row)?);
        }
        Ok(applications)
    }

    /// Applications of one call, optionally filtered by status, in code order.
    pub fn list_for_call(
        &self,
        call_id: CallId,
        status: Option<ApplicationStatus>,
    ) -> RepoResult<Vec<Application>> {
        self.query_many(
            &format!(
                "{APPLICATION_SELECT_SQL}
                 WHERE a.call_id = ?1 AND (?2 IS NULL OR a.status = ?2)
                 ORDER BY a.code ASC;"
            ),
            &[
                Some(call_id.to_string()),
                status.map(|s| s.as_str().to_string()),
            ],
        )
    }

    pub fn list_by_status(&self, status: ApplicationStatus) -> RepoResult<Vec<Application>> {
        self.query_many(
            &format!("{APPLICATION_SELECT_SQL} WHERE a.status = ?1 ORDER BY a.code ASC;"),
            &[Some(status.as_str().to_string())],
        )
    }

    pub fn list_for_applicant(&self, applicant_id: UserId) -> RepoResult<Vec<Application>> {
        self.query_many(
            &format!("{APPLICATION_SELECT_SQL} WHERE a.applicant_id = ?1 ORDER BY a.code ASC;"),
            &[Some(applicant_id.to_string())],
        )
    }

    /// Evaluated applications of one call, best score first.
    pub fn prioritized(&self, call_id: CallId) -> RepoResult<Vec<Application>> {
        self.query_many(
            &format!(
                "{APPLICATION_SELECT_SQL}
                 WHERE a.call_id = ?1 AND a.status = 'evaluated'
                 ORDER BY a.final_score DESC NULLS LAST, a.code ASC;"
            ),
            &[Some(call_id.to_string())],
        )
    }

    /// Evaluated applications needing a decision from `node_id`.
    pub fn awaiting_node(
        &self,
        node_id: NodeId,
        call_id: Option<CallId>,
    ) -> RepoResult<Vec<Application>> {
        self.query_many(
            &format!(
                "{APPLICATION_SELECT_SQL}
                 WHERE a.status = 'evaluated'
                   AND (?2 IS NULL OR a.call_id = ?2)
                   AND EXISTS (
                      SELECT 1 FROM requested_access ra
                      JOIN equipment e ON e.id = ra.equipment_id
                      WHERE ra.application_id = a.id AND e.node_id = ?1
                   )
                   AND NOT EXISTS (
                      SELECT 1 FROM node_resolutions nr
                      WHERE nr.application_id = a.id AND nr.node_id = ?1 AND nr.resolution <> ''
                   )
                 ORDER BY a.final_score DESC NULLS LAST, a.code ASC;"
            ),
            &[Some(node_id.to_string()), call_id.map(|id| id.to_string())],
        )
    }

    /// Applications on which `node_id` has recorded a decision.
    pub fn resolved_by_node(
        &self,
        node_id: NodeId,
        call_id: Option<CallId>,
    ) -> RepoResult<Vec<Application>> {
        self.query_many(
            &format!(
                "{APPLICATION_SELECT_SQL}
                 WHERE (?2 IS NULL OR a.call_id = ?2)
                   AND EXISTS (
                      SELECT 1 FROM node_resolutions nr
                      WHERE nr.application_id = a.id AND nr.node_id = ?1 AND nr.resolution <> ''
                   )
                 ORDER BY a.final_score DESC NULLS LAST, a.code ASC;"
            ),
            &[Some(node_id.to_string()), call_id.map(|id| id.to_string())],
        )
    }

    /// Applications of one call requesting equipment owned by `node_id`.
    pub fn requesting_node(&self, node_id: NodeId, call_id: CallId) -> RepoResult<Vec<Application>> {
        self.query_many(
            &format!(
                "{APPLICATION_SELECT_SQL}
                 WHERE a.call_id = ?2
                   AND EXISTS (
                      SELECT 1 FROM requested_access ra
                      JOIN equipment e ON e.id = ra.equipment_id
                      WHERE ra.application_id = a.id AND e.node_id = ?1
                   )
                 ORDER BY a.code ASC;"
            ),
            &[Some(node_id.to_string()), Some(call_id.to_string())],
        )
    }

    /// Adds a request, or replaces the requested hours for the same equipment.
    pub fn upsert_requested_access(&self, access: &RequestedAccess) -> RepoResult<()> {
        access.validate()?;
        self.conn.execute(
            "INSERT INTO requested_access (id, application_id, equipment_id, hours_requested)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (application_id, equipment_id)
             DO UPDATE SET hours_requested = excluded.hours_requested;",
            params![
                access.id.to_string(),
                access.application_id.to_string(),
                access.equipment_id.to_string(),
                access.hours_requested,
            ],
        )?;
        Ok(())
    }

    pub fn remove_requested_access(
        &self,
        application_id: ApplicationId,
        equipment_id: EquipmentId,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM requested_access WHERE application_id = ?1 AND equipment_id = ?2;",
            [application_id.to_string(), equipment_id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("requested access", equipment_id));
        }
        Ok(())
    }

    pub fn update_requested_access(&self, access: &RequestedAccess) -> RepoResult<()> {
        access.validate()?;
        let changed = self.conn.execute(
            "UPDATE requested_access
             SET
                hours_requested = ?1,
                hours_approved = ?2,
                hours_granted = ?3,
                is_completed = ?4,
                completed_by = ?5,
                completed_at = ?6,
                actual_hours_used = ?7
             WHERE id = ?8;",
            params![
                access.hours_requested,
                access.hours_approved,
                access.hours_granted,
                bool_to_int(access.is_completed),
                opt_uuid_text(access.completed_by),
                access.completed_at,
                access.actual_hours_used,
                access.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("requested access", access.id));
        }
        Ok(())
    }

    /// Requests of one application joined with equipment and node.
    pub fn requested_access(&self, application_id: ApplicationId) -> RepoResult<Vec<RequestedAccessDetail>> {
        self.query_access(
            "WHERE ra.application_id = ?1 ORDER BY e.name ASC, ra.id ASC;",
            &[application_id.to_string()],
        )
    }

    /// Requests of one application for equipment owned by `node_id`.
    pub fn requested_access_for_node(
        &self,
        application_id: ApplicationId,
        node_id: NodeId,
    ) -> RepoResult<Vec<RequestedAccessDetail>> {
        self.query_access(
            "WHERE ra.application_id = ?1 AND e.node_id = ?2 ORDER BY e.name ASC, ra.id ASC;",
            &[application_id.to_string(), node_id.to_string()],
        )
    }

    fn query_access(&self, filter: &str, args: &[String]) -> RepoResult<Vec<RequestedAccessDetail>> {
        let sql = format!(
            "SELECT
                ra.id, ra.application_id, ra.equipment_id, ra.hours_requested,
                ra.hours_approved, ra.hours_granted, ra.is_completed, ra.completed_by,
                ra.completed_at, ra.actual_hours_used,
                e.name AS equipment_name, e.node_id AS node_id
             FROM requested_access ra
             JOIN equipment e ON e.id = ra.equipment_id
             {filter}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut details = Vec::new();
        while let Some(row) = rows.next()? {
            details.push(RequestedAccessDetail {
                access: parse_requested_access_row(row)?,
                equipment_name: row.get("equipment_name")?,
                node_id: get_uuid(row, "node_id")?,
            });
        }
        Ok(details)
    }

    pub fn get_requested_access(
        &self,
        application_id: ApplicationId,
        equipment_id: EquipmentId,
    ) -> RepoResult<Option<RequestedAccess>> {
        let mut stmt = self.conn.prepare(&format!(
            "{REQUESTED_ACCESS_SELECT_SQL} WHERE ra.application_id = ?1 AND ra.equipment_id = ?2;"
        ))?;
        let mut rows = stmt.query([application_id.to_string(), equipment_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_requested_access_row(row)?)),
            None => Ok(None),
        }
    }

    /// Distinct nodes owning requested equipment, in node-code order.
    pub fn involved_nodes(&self, application_id: ApplicationId) -> RepoResult<Vec<InvolvedNode>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT n.id, n.code, n.name
             FROM requested_access ra
             JOIN equipment e ON e.id = ra.equipment_id
             JOIN nodes n ON n.id = e.node_id
             WHERE ra.application_id = ?1
             ORDER BY n.code ASC;",
        )?;
        let mut rows = stmt.query([application_id.to_string()])?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next()? {
            nodes.push(InvolvedNode {
                node_id: get_uuid(row, "id")?,
                code: row.get("code")?,
                name: row.get("name")?,
            });
        }
        Ok(nodes)
    }

    pub fn total_hours_requested(&self, application_id: ApplicationId) -> RepoResult<f64> {
        let total: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(hours_requested), 0.0)
             FROM requested_access WHERE application_id = ?1;",
            [application_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Granted hours on `equipment_id` held by accepted or waitlisted
    /// applications of `call_id`, optionally ignoring one application.
    pub fn allocated_hours(
        &self,
        call_id: CallId,
        equipment_id: EquipmentId,
        excluding: Option<ApplicationId>,
    ) -> RepoResult<f64> {
        let total: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(ra.hours_granted), 0.0)
             FROM requested_access ra
             JOIN applications a ON a.id = ra.application_id
             WHERE a.call_id = ?1
               AND ra.equipment_id = ?2
               AND a.status IN ('accepted', 'pending')
               AND (?3 IS NULL OR a.id <> ?3);",
            params![
                call_id.to_string(),
                equipment_id.to_string(),
                opt_uuid_text(excluding)
            ],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn create_feasibility_review(&self, review: &FeasibilityReview) -> RepoResult<()> {
        self.conn
            .execute(
                "INSERT INTO feasibility_reviews (
                    id, application_id, node_id, reviewer_id, is_feasible, comments, reviewed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                params![
                    review.id.to_string(),
                    review.application_id.to_string(),
                    review.node_id.to_string(),
                    opt_uuid_text(review.reviewer_id),
                    review.is_feasible.map(bool_to_int),
                    review.comments.as_str(),
                    review.reviewed_at,
                ],
            )
            .map_err(|err| {
                map_insert_error(err, || {
                    format!(
                        "feasibility review for node {} on application {}",
                        review.node_id, review.application_id
                    )
                })
            })?;
        Ok(())
    }

    pub fn update_feasibility_review(&self, review: &FeasibilityReview) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE feasibility_reviews
             SET reviewer_id = ?1, is_feasible = ?2, comments = ?3, reviewed_at = ?4
             WHERE id = ?5;",
            params![
                opt_uuid_text(review.reviewer_id),
                review.is_feasible.map(bool_to_int),
                review.comments.as_str(),
                review.reviewed_at,
                review.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("feasibility review", review.id));
        }
        Ok(())
    }

    pub fn feasibility_reviews(&self, application_id: ApplicationId) -> RepoResult<Vec<FeasibilityReview>> {
        self.query_reviews(
            &format!("{FEASIBILITY_SELECT_SQL} WHERE application_id = ?1 ORDER BY created_at ASC, id ASC;"),
            &[application_id.to_string()],
        )
    }

    pub fn feasibility_review_for(
        &self,
        application_id: ApplicationId,
        node_id: NodeId,
    ) -> RepoResult<Option<FeasibilityReview>> {
        let mut reviews = self.query_reviews(
            &format!("{FEASIBILITY_SELECT_SQL} WHERE application_id = ?1 AND node_id = ?2;"),
            &[application_id.to_string(), node_id.to_string()],
        )?;
        Ok(reviews.pop())
    }

    /// Undecided reviews whose application was submitted at or before `cutoff`.
    pub fn pending_feasibility_reviews(&self, submitted_before: i64) -> RepoResult<Vec<FeasibilityReview>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.application_id, f.node_id, f.reviewer_id, f.is_feasible,
                    f.comments, f.reviewed_at
             FROM feasibility_reviews f
             JOIN applications a ON a.id = f.application_id
             WHERE f.is_feasible IS NULL
               AND a.status = 'under_feasibility_review'
               AND a.submitted_at <= ?1
             ORDER BY a.code ASC, f.id ASC;",
        )?;
        let mut rows = stmt.query([submitted_before])?;
        let mut reviews = Vec::new();
        while let Some(row) = rows.next()? {
            reviews.push(parse_feasibility_row(row)?);
        }
        Ok(reviews)
    }

    fn query_reviews(&self, sql: &str, args: &[String]) -> RepoResult<Vec<FeasibilityReview>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut reviews = Vec::new();
        while let Some(row) = rows.next()? {
            reviews.push(parse_feasibility_row(row)?);
        }
        Ok(reviews)
    }

    /// Inserts or overwrites the decision of one node on one application.
    pub fn upsert_node_resolution(&self, resolution: &NodeResolution) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO node_resolutions (
                id, application_id, node_id, reviewer_id, resolution, comments, reviewed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (application_id, node_id) DO UPDATE SET
                reviewer_id = excluded.reviewer_id,
                resolution = excluded.resolution,
                comments = excluded.comments,
                reviewed_at = excluded.reviewed_at;",
            params![
                resolution.id.to_string(),
                resolution.application_id.to_string(),
                resolution.node_id.to_string(),
                resolution.reviewer_id.to_string(),
                resolution.resolution.map_or("", NodeDecision::as_str),
                resolution.comments.as_str(),
                resolution.reviewed_at,
            ],
        )?;
        Ok(())
    }

    pub fn node_resolution_for(
        &self,
        application_id: ApplicationId,
        node_id: NodeId,
    ) -> RepoResult<Option<NodeResolution>> {
        let mut resolutions = self.query_node_resolutions(
            &format!("{NODE_RESOLUTION_SELECT_SQL} WHERE application_id = ?1 AND node_id = ?2;"),
            &[application_id.to_string(), node_id.to_string()],
        )?;
        Ok(resolutions.pop())
    }

    pub fn node_resolutions(&self, application_id: ApplicationId) -> RepoResult<Vec<NodeResolution>> {
        self.query_node_resolutions(
            &format!("{NODE_RESOLUTION_SELECT_SQL} WHERE application_id = ?1 ORDER BY id ASC;"),
            &[application_id.to_string()],
        )
    }

    fn query_node_resolutions(&self, sql: &str, args: &[String]) -> RepoResult<Vec<NodeResolution>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut resolutions = Vec::new();
        while let Some(row) = rows.next()? {
            resolutions.push(NodeResolution {
                id: get_uuid(row, "id")?,
                application_id: get_uuid(row, "application_id")?,
                node_id: get_uuid(row, "node_id")?,
                reviewer_id: get_uuid(row, "reviewer_id")?,
                resolution: get_opt_enum(row, "resolution", NodeDecision::parse)?,
                comments: row.get("comments")?,
                reviewed_at: row.get("reviewed_at")?,
            });
        }
        Ok(resolutions)
    }
}

fn is_code_collision(err: &rusqlite::Error) -> bool {
    is_unique_violation(err) && err.to_string().contains("applications.code")
}

fn parse_application_row(row: &Row<'_>) -> RepoResult<Application> {
    let application = Application {
        id: get_uuid(row, "id")?,
        call_id: get_uuid(row, "call_id")?,
        applicant_id: get_uuid(row, "applicant_id")?,
        code: row.get("code")?,
        status: get_enum(row, "status", ApplicationStatus::parse)?,
        brief_description: row.get("brief_description")?,
        project_title: row.get("project_title")?,
        project_code: row.get("project_code")?,
        funding_agency: row.get("funding_agency")?,
        has_competitive_funding: get_bool(row, "has_competitive_funding")?,
        specialization_area: row.get("specialization_area")?,
        scientific_relevance: row.get("scientific_relevance")?,
        methodology_description: row.get("methodology_description")?,
        expected_contributions: row.get("expected_contributions")?,
        impact_strengths: row.get("impact_strengths")?,
        uses_animals: get_bool(row, "uses_animals")?,
        has_animal_ethics: get_bool(row, "has_animal_ethics")?,
        uses_humans: get_bool(row, "uses_humans")?,
        has_human_ethics: get_bool(row, "has_human_ethics")?,
        data_consent: get_bool(row, "data_consent")?,
        final_score: row.get("final_score")?,
        resolution: get_opt_enum(row, "resolution", Resolution::parse)?,
        resolution_date: row.get("resolution_date")?,
        resolution_comments: row.get("resolution_comments")?,
        acceptance_deadline: row.get("acceptance_deadline")?,
        accepted_by_applicant: get_opt_bool(row, "accepted_by_applicant")?,
        accepted_at: row.get("accepted_at")?,
        handoff_email_sent_at: row.get("handoff_email_sent_at")?,
        submitted_at: row.get("submitted_at")?,
    };
    application.validate()?;
    Ok(application)
}

fn parse_requested_access_row(row: &Row<'_>) -> RepoResult<RequestedAccess> {
    Ok(RequestedAccess {
        id: get_uuid(row, "id")?,
        application_id: get_uuid(row, "application_id")?,
        equipment_id: get_uuid(row, "equipment_id")?,
        hours_requested: row.get("hours_requested")?,
        hours_approved: row.get("hours_approved")?,
        hours_granted: row.get("hours_granted")?,
        is_completed: get_bool(row, "is_completed")?,
        completed_by: get_opt_uuid(row, "completed_by")?,
        completed_at: row.get("completed_at")?,
        actual_hours_used: row.get("actual_hours_used")?,
    })
}

fn parse_feasibility_row(row: &Row<'_>) -> RepoResult<FeasibilityReview> {
    Ok(FeasibilityReview {
        id: get_uuid(row, "id")?,
        application_id: get_uuid(row, "application_id")?,
        node_id: get_uuid(row, "node_id")?,
        reviewer_id: get_opt_uuid(row, "reviewer_id")?,
        is_feasible: get_opt_bool(row, "is_feasible")?,
        comments: row.get("comments")?,
        reviewed_at: row.get("reviewed_at")?,
    })
}
