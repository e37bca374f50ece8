//! Calls and their per-equipment hour offers.

use super::{bool_to_int, get_bool, get_enum, get_uuid, map_insert_error, RepoError, RepoResult};
use crate::model::call::{Call, CallEquipmentAllocation, CallId, CallStatus};
use crate::model::directory::EquipmentId;
use rusqlite::{params, Connection, Row};

const CALL_SELECT_SQL: &str = "SELECT
    id,
    code,
    title,
    status,
    submission_start,
    submission_end,
    evaluation_deadline,
    execution_start,
    execution_end,
    published_at,
    is_resolution_locked
FROM calls";

pub struct SqliteCallRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCallRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn create_call(&self, call: &Call) -> RepoResult<CallId> {
        self.conn
            .execute(
                "INSERT INTO calls (
                    id, code, title, status,
                    submission_start, submission_end, evaluation_deadline,
                    execution_start, execution_end, published_at, is_resolution_locked
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
                params![
                    call.id.to_string(),
                    call.code.as_str(),
                    call.title.as_str(),
                    call.status.as_str(),
                    call.submission_start,
                    call.submission_end,
                    call.evaluation_deadline,
                    call.execution_start,
                    call.execution_end,
                    call.published_at,
                    bool_to_int(call.is_resolution_locked),
                ],
            )
            .map_err(|err| map_insert_error(err, || format!("call code `{}`", call.code)))?;
        Ok(call.id)
    }

    pub fn update_call(&self, call: &Call) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE calls
             SET
                title = ?1,
                status = ?2,
                submission_start = ?3,
                submission_end = ?4,
                evaluation_deadline = ?5,
                execution_start = ?6,
                execution_end = ?7,
                published_at = ?8,
                is_resolution_locked = ?9
             WHERE id = ?10;",
            params![
                call.title.as_str(),
                call.status.as_str(),
                call.submission_start,
                call.submission_end,
                call.evaluation_deadline,
                call.execution_start,
                call.execution_end,
                call.published_at,
                bool_to_int(call.is_resolution_locked),
                call.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("call", call.id));
        }
        Ok(())
    }

    pub fn get_call(&self, id: CallId) -> RepoResult<Option<Call>> {
        self.query_one(&format!("{CALL_SELECT_SQL} WHERE id = ?1;"), &id.to_string())
    }

    pub fn get_call_by_code(&self, code: &str) -> RepoResult<Option<Call>> {
        self.query_one(&format!("{CALL_SELECT_SQL} WHERE code = ?1;"), code)
    }

    pub fn require_call(&self, id: CallId) -> RepoResult<Call> {
        self.get_call(id)?
            .ok_or_else(|| RepoError::not_found("call", id))
    }

    fn query_one(&self, sql: &str, key: &str) -> RepoResult<Option<Call>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_call_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_calls(&self, status: Option<CallStatus>) -> RepoResult<Vec<Call>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CALL_SELECT_SQL}
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY submission_start DESC, code ASC;"
        ))?;
        let mut rows = stmt.query([status.map(CallStatus::as_str)])?;
        let mut calls = Vec::new();
        while let Some(row) = rows.next()? {
            calls.push(parse_call_row(row)?);
        }
        Ok(calls)
    }

    /// Inserts or replaces the hours offered for one equipment.
    pub fn set_allocation(&self, allocation: &CallEquipmentAllocation) -> RepoResult<()> {
        crate::model::application::validate_hours(allocation.hours_offered)?;
        self.conn.execute(
            "INSERT INTO call_equipment_allocations (call_id, equipment_id, hours_offered)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (call_id, equipment_id) DO UPDATE SET hours_offered = excluded.hours_offered;",
            params![
                allocation.call_id.to_string(),
                allocation.equipment_id.to_string(),
                allocation.hours_offered,
            ],
        )?;
        Ok(())
    }

    pub fn allocations(&self, call_id: CallId) -> RepoResult<Vec<CallEquipmentAllocation>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.call_id, a.equipment_id, a.hours_offered
             FROM call_equipment_allocations a
             JOIN equipment e ON e.id = a.equipment_id
             WHERE a.call_id = ?1
             ORDER BY e.name ASC, a.equipment_id ASC;",
        )?;
        let mut rows = stmt.query([call_id.to_string()])?;
        let mut allocations = Vec::new();
        while let Some(row) = rows.next()? {
            allocations.push(CallEquipmentAllocation {
                call_id: get_uuid(row, "call_id")?,
                equipment_id: get_uuid(row, "equipment_id")?,
                hours_offered: row.get("hours_offered")?,
            });
        }
        Ok(allocations)
    }

    pub fn allocation_for(
        &self,
        call_id: CallId,
        equipment_id: EquipmentId,
    ) -> RepoResult<Option<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT hours_offered FROM call_equipment_allocations
             WHERE call_id = ?1 AND equipment_id = ?2;",
        )?;
        let mut rows = stmt.query([call_id.to_string(), equipment_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn total_hours_offered(&self, call_id: CallId) -> RepoResult<f64> {
        let total: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(hours_offered), 0.0)
             FROM call_equipment_allocations WHERE call_id = ?1;",
            [call_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

fn parse_call_row(row: &Row<'_>) -> RepoResult<Call> {
    Ok(Call {
        id: get_uuid(row, "id")?,
        code: row.get("code")?,
        title: row.get("title")?,
        status: get_enum(row, "status", CallStatus::parse)?,
        submission_start: row.get("submission_start")?,
        submission_end: row.get("submission_end")?,
        evaluation_deadline: row.get("evaluation_deadline")?,
        execution_start: row.get("execution_start")?,
        execution_end: row.get("execution_end")?,
        published_at: row.get("published_at")?,
        is_resolution_locked: get_bool(row, "is_resolution_locked")?,
    })
}
