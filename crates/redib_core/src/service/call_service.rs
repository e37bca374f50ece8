//! Call lifecycle: draft, publication, closing and hour offers.

use crate::db;
use crate::model::call::{Call, CallEquipmentAllocation, CallId, CallStatus};
use crate::model::communication::EmailKind;
use crate::model::directory::EquipmentId;
use crate::repo::call_repo::SqliteCallRepository;
use crate::repo::directory_repo::SqliteDirectoryRepository;
use crate::repo::RepoError;
use crate::service::error::{ValidationError, WorkflowResult};
use crate::service::outbox::{Outbox, Related};
use log::info;
use rusqlite::Connection;

pub struct CallService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> CallService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn create_call(&self, call: &Call) -> WorkflowResult<CallId> {
        let id = SqliteCallRepository::new(self.conn).create_call(call)?;
        info!(
            "event=call_create module=call status=ok call={}",
            call.code
        );
        Ok(id)
    }

    pub fn get_call_by_code(&self, code: &str) -> WorkflowResult<Option<Call>> {
        Ok(SqliteCallRepository::new(self.conn).get_call_by_code(code)?)
    }

    /// Opens a draft call and announces it; returns the number of emails queued.
    pub fn publish(&self, call_id: CallId, now_ms: i64) -> WorkflowResult<usize> {
        let tx = db::begin_immediate(self.conn)?;
        let calls = SqliteCallRepository::new(&tx);
        let mut call = calls.require_call(call_id)?;
        expect_status(&call, CallStatus::Draft)?;

        call.status = CallStatus::Open;
        call.published_at = Some(now_ms);
        calls.update_call(&call)?;

        let users = SqliteDirectoryRepository::new(&tx).list_users()?;
        let subject = format!("[ReDIB] New access call {}: {}", call.code, call.title);
        let queued = Outbox::new(&tx).queue_all(
            EmailKind::CallPublished,
            &users,
            &subject,
            Related::call(call.id),
            now_ms,
        )?;
        tx.commit()?;
        info!(
            "event=call_publish module=call status=ok call={} queued={queued}",
            call.code
        );
        Ok(queued)
    }

    pub fn close(&self, call_id: CallId) -> WorkflowResult<Call> {
        let calls = SqliteCallRepository::new(self.conn);
        let mut call = calls.require_call(call_id)?;
        expect_status(&call, CallStatus::Open)?;
        call.status = CallStatus::Closed;
        calls.update_call(&call)?;
        info!("event=call_close module=call status=ok call={}", call.code);
        Ok(call)
    }

    /// Offers `hours` of one equipment in the call, replacing any earlier offer.
    pub fn set_allocation(
        &self,
        call_id: CallId,
        equipment_id: EquipmentId,
        hours: f64,
    ) -> WorkflowResult<()> {
        if !hours.is_finite() || hours < 0.0 {
            return Err(ValidationError::InvalidHours(hours).into());
        }
        SqliteDirectoryRepository::new(self.conn)
            .get_equipment(equipment_id)?
            .ok_or_else(|| RepoError::not_found("equipment", equipment_id))?;
        SqliteCallRepository::new(self.conn).set_allocation(&CallEquipmentAllocation {
            call_id,
            equipment_id,
            hours_offered: hours,
        })?;
        Ok(())
    }

    pub fn total_hours_offered(&self, call_id: CallId) -> WorkflowResult<f64> {
        Ok(SqliteCallRepository::new(self.conn).total_hours_offered(call_id)?)
    }
}

fn expect_status(call: &Call, expected: CallStatus) -> Result<(), ValidationError> {
    if call.status == expected {
        return Ok(());
    }
    Err(ValidationError::UnexpectedCallStatus {
        call_code: call.code.clone(),
        expected,
        actual: call.status,
    })
}
