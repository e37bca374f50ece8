//! Call-level resolution by the ReDIB coordinator.
//!
//! # Responsibility
//! - Rank evaluated applications and track equipment hours per call.
//! - Resolve single applications or a whole call in one pass.
//! - Finalize and lock a call once nothing is left unresolved.
//!
//! # Invariants
//! - Competitive-funding applications are never rejected and never need hours.
//! - Allocated hours are granted hours of `accepted` or `pending` applications.
//! - A locked call accepts no further resolution.

use crate::clock::days;
use crate::db;
use crate::model::application::{Application, ApplicationId, ACCEPTANCE_WINDOW_DAYS};
use crate::model::call::{Call, CallId, CallStatus};
use crate::model::directory::EquipmentId;
use crate::model::status::{ApplicationStatus, Resolution};
use crate::repo::application_repo::SqliteApplicationRepository;
use crate::repo::call_repo::SqliteCallRepository;
use crate::repo::directory_repo::SqliteDirectoryRepository;
use crate::service::error::{ValidationError, WorkflowResult};
use crate::service::notify::resolution_email;
use crate::service::outbox::{Outbox, Related};
use log::info;
use rusqlite::Connection;

/// Offered versus allocated hours of one equipment within one call.
#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentHours {
    pub equipment_id: EquipmentId,
    pub equipment_name: String,
    pub offered: f64,
    pub allocated: f64,
    /// Never negative; see `over_allocated`.
    pub remaining: f64,
    pub over_allocated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoAllocation {
    pub application_code: String,
    pub resolution: Resolution,
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkAllocationReport {
    pub accepted: usize,
    pub pending: usize,
    pub rejected: usize,
    pub decisions: Vec<AutoAllocation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeStats {
    pub total: usize,
    pub accepted: usize,
    pub pending: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionSummary {
    /// Applications that reached evaluation.
    pub total: usize,
    pub evaluated: usize,
    pub accepted: usize,
    pub pending: usize,
    pub rejected: usize,
    pub competitive_funding: usize,
    pub average_score: Option<f64>,
    pub is_locked: bool,
    pub all_resolved: bool,
}

pub struct ResolutionService<'conn> {
    conn: &'conn Connection,
    acceptance_window_ms: i64,
}

impl<'conn> ResolutionService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            acceptance_window_ms: days(ACCEPTANCE_WINDOW_DAYS),
        }
    }

    pub fn with_acceptance_window_days(mut self, window_days: u32) -> Self {
        self.acceptance_window_ms = days(window_days);
        self
    }

    /// Evaluated applications, `final_score DESC, code ASC`.
    pub fn prioritized_applications(&self, call_id: CallId) -> WorkflowResult<Vec<Application>> {
        Ok(SqliteApplicationRepository::new(self.conn).prioritized(call_id)?)
    }

    pub fn hours_availability(&self, call_id: CallId) -> WorkflowResult<Vec<EquipmentHours>> {
        let calls = SqliteCallRepository::new(self.conn);
        let apps = SqliteApplicationRepository::new(self.conn);
        let directory = SqliteDirectoryRepository::new(self.conn);
        let mut hours = Vec::new();
        for allocation in calls.allocations(call_id)? {
            let allocated = apps.allocated_hours(call_id, allocation.equipment_id, None)?;
            let equipment_name = directory
                .get_equipment(allocation.equipment_id)?
                .map(|equipment| equipment.name)
                .unwrap_or_default();
            let remaining = allocation.hours_offered - allocated;
            hours.push(EquipmentHours {
                equipment_id: allocation.equipment_id,
                equipment_name,
                offered: allocation.hours_offered,
                allocated,
                remaining: remaining.max(0.0),
                over_allocated: remaining < 0.0,
            });
        }
        Ok(hours)
    }

    /// Whether accepting `application_id` fits the hours still offered.
    pub fn can_accept(&self, application_id: ApplicationId) -> WorkflowResult<bool> {
        let application = SqliteApplicationRepository::new(self.conn).require_application(application_id)?;
        Ok(hours_shortfall(self.conn, &application)?.is_none())
    }

    /// Resolves one application directly, bypassing node aggregation.
    pub fn apply_resolution(
        &self,
        application_id: ApplicationId,
        resolution: Resolution,
        comments: &str,
        now_ms: i64,
    ) -> WorkflowResult<Application> {
        let tx = db::begin_immediate(self.conn)?;
        let apps = SqliteApplicationRepository::new(&tx);
        let application = apps.require_application(application_id)?;
        let call = SqliteCallRepository::new(&tx).require_call(application.call_id)?;
        ensure_unlocked(&call)?;
        let application = self.resolve_in_tx(&tx, application, resolution, comments, now_ms)?;
        tx.commit()?;
        Ok(application)
    }

    fn resolve_in_tx(
        &self,
        conn: &Connection,
        mut application: Application,
        resolution: Resolution,
        comments: &str,
        now_ms: i64,
    ) -> WorkflowResult<Application> {
        if resolution == Resolution::Rejected && application.has_competitive_funding {
            return Err(ValidationError::CompetitiveFundingProtected {
                application_code: application.code,
            }
            .into());
        }
        if resolution == Resolution::Accepted {
            if let Some(shortfall) = hours_shortfall(conn, &application)? {
                return Err(shortfall.into());
            }
        }

        let apps = SqliteApplicationRepository::new(conn);
        application.resolution = Some(resolution);
        application.resolution_date = Some(now_ms);
        application.resolution_comments = comments.trim().to_string();
        application.status = resolution.status();
        application.acceptance_deadline = match resolution {
            Resolution::Accepted => Some(now_ms + self.acceptance_window_ms),
            Resolution::Pending | Resolution::Rejected => None,
        };
        apps.update_application(&application)?;

        for detail in apps.requested_access(application.id)? {
            let mut access = detail.access;
            access.hours_granted = match resolution {
                Resolution::Accepted | Resolution::Pending => Some(access.hours_requested),
                Resolution::Rejected => None,
            };
            apps.update_requested_access(&access)?;
        }
        info!(
            "event=application_resolved module=resolution status=ok application={} resolution={resolution}",
            application.code
        );
        Ok(application)
    }

    /// Resolves every evaluated application of a call in priority order.
    ///
    /// Competitive funding is accepted unconditionally; a score below
    /// `threshold` is rejected; otherwise hours decide between accept and
    /// `pending` (or reject when `auto_pending` is off).
    pub fn bulk_auto_allocate(
        &self,
        call_id: CallId,
        threshold: f64,
        auto_pending: bool,
        now_ms: i64,
    ) -> WorkflowResult<BulkAllocationReport> {
        let tx = db::begin_immediate(self.conn)?;
        let call = SqliteCallRepository::new(&tx).require_call(call_id)?;
        ensure_unlocked(&call)?;

        let mut report = BulkAllocationReport::default();
        for application in SqliteApplicationRepository::new(&tx).prioritized(call_id)? {
            let score = application.final_score.unwrap_or(0.0);
            let (resolution, comment) = if application.has_competitive_funding {
                (
                    Resolution::Accepted,
                    "Auto-approved (competitive funding)".to_string(),
                )
            } else if score < threshold {
                (
                    Resolution::Rejected,
                    format!("Score below threshold ({score:.2})"),
                )
            } else if hours_shortfall(&tx, &application)?.is_none() {
                (
                    Resolution::Accepted,
                    format!("Auto-allocated (score: {score:.2})"),
                )
            } else if auto_pending {
                (
                    Resolution::Pending,
                    "Waiting list: insufficient equipment hours".to_string(),
                )
            } else {
                (
                    Resolution::Rejected,
                    "Insufficient equipment hours".to_string(),
                )
            };

            let code = application.code.clone();
            self.resolve_in_tx(&tx, application, resolution, &comment, now_ms)?;
            match resolution {
                Resolution::Accepted => report.accepted += 1,
                Resolution::Pending => report.pending += 1,
                Resolution::Rejected => report.rejected += 1,
            }
            report.decisions.push(AutoAllocation {
                application_code: code,
                resolution,
                comment,
            });
        }
        tx.commit()?;
        info!(
            "event=bulk_auto_allocate module=resolution status=ok call={} accepted={} pending={} rejected={}",
            call.code, report.accepted, report.pending, report.rejected
        );
        Ok(report)
    }

    /// Locks the call, marks it resolved and queues resolution emails.
    pub fn finalize_resolution(&self, call_id: CallId, now_ms: i64) -> WorkflowResult<FinalizeStats> {
        let tx = db::begin_immediate(self.conn)?;
        let calls = SqliteCallRepository::new(&tx);
        let apps = SqliteApplicationRepository::new(&tx);
        let directory = SqliteDirectoryRepository::new(&tx);
        let outbox = Outbox::new(&tx);

        let mut call = calls.require_call(call_id)?;
        ensure_unlocked(&call)?;
        let unresolved = apps
            .list_for_call(call_id, Some(ApplicationStatus::Evaluated))?
            .len();
        if unresolved > 0 {
            return Err(ValidationError::UnresolvedApplications {
                call_code: call.code,
                count: unresolved,
            }
            .into());
        }

        let mut stats = FinalizeStats::default();
        for mut application in apps.list_for_call(call_id, None)? {
            let Some(resolution) = application.resolution else {
                continue;
            };
            stats.total += 1;
            match resolution {
                Resolution::Accepted => stats.accepted += 1,
                Resolution::Pending => stats.pending += 1,
                Resolution::Rejected => stats.rejected += 1,
            }
            if resolution == Resolution::Accepted && application.acceptance_deadline.is_none() {
                let resolved_at = application.resolution_date.unwrap_or(now_ms);
                application.acceptance_deadline = Some(resolved_at + self.acceptance_window_ms);
                apps.update_application(&application)?;
            }
            let applicant = directory.require_user(application.applicant_id)?;
            let (kind, verb) = resolution_email(resolution);
            outbox.queue(
                kind,
                &applicant,
                format!("[ReDIB] Application {} {verb}", application.code),
                Related::application(application.id),
                now_ms,
            )?;
        }

        call.is_resolution_locked = true;
        call.status = CallStatus::Resolved;
        calls.update_call(&call)?;
        tx.commit()?;
        info!(
            "event=resolution_finalized module=resolution status=ok call={} total={} accepted={} pending={} rejected={}",
            call.code, stats.total, stats.accepted, stats.pending, stats.rejected
        );
        Ok(stats)
    }

    pub fn resolution_summary(&self, call_id: CallId) -> WorkflowResult<ResolutionSummary> {
        let call = SqliteCallRepository::new(self.conn).require_call(call_id)?;
        let applications = SqliteApplicationRepository::new(self.conn).list_for_call(call_id, None)?;

        let mut summary = ResolutionSummary {
            is_locked: call.is_resolution_locked,
            ..ResolutionSummary::default()
        };
        let mut scores = Vec::new();
        for application in applications
            .iter()
            .filter(|application| reached_evaluation(application.status))
        {
            summary.total += 1;
            if application.status == ApplicationStatus::Evaluated {
                summary.evaluated += 1;
            }
            match application.resolution {
                Some(Resolution::Accepted) => summary.accepted += 1,
                Some(Resolution::Pending) => summary.pending += 1,
                Some(Resolution::Rejected) => summary.rejected += 1,
                None => {}
            }
            if application.has_competitive_funding {
                summary.competitive_funding += 1;
            }
            if let Some(score) = application.final_score {
                scores.push(score);
            }
        }
        if !scores.is_empty() {
            summary.average_score = Some(scores.iter().sum::<f64>() / scores.len() as f64);
        }
        summary.all_resolved = summary.evaluated == 0;
        Ok(summary)
    }
}

fn reached_evaluation(status: ApplicationStatus) -> bool {
    matches!(
        status,
        ApplicationStatus::Evaluated
            | ApplicationStatus::Accepted
            | ApplicationStatus::Pending
            | ApplicationStatus::Rejected
            | ApplicationStatus::DeclinedByApplicant
            | ApplicationStatus::Expired
    )
}

fn ensure_unlocked(call: &Call) -> Result<(), ValidationError> {
    if call.is_resolution_locked {
        return Err(ValidationError::ResolutionLocked {
            call_code: call.code.clone(),
        });
    }
    Ok(())
}

/// First requested equipment whose remaining call hours cannot cover the
/// request; `None` when the application fits or has competitive funding.
fn hours_shortfall(
    conn: &Connection,
    application: &Application,
) -> WorkflowResult<Option<ValidationError>> {
    if application.has_competitive_funding {
        return Ok(None);
    }
    let calls = SqliteCallRepository::new(conn);
    let apps = SqliteApplicationRepository::new(conn);
    for detail in apps.requested_access(application.id)? {
        let equipment_id = detail.access.equipment_id;
        let requested = detail.access.hours_requested;
        let Some(offered) = calls.allocation_for(application.call_id, equipment_id)? else {
            return Ok(Some(ValidationError::InsufficientHours {
                equipment_id,
                requested,
                remaining: 0.0,
            }));
        };
        let allocated = apps.allocated_hours(application.call_id, equipment_id, Some(application.id))?;
        let remaining = offered - allocated;
        if requested > remaining {
            return Ok(Some(ValidationError::InsufficientHours {
                equipment_id,
                requested,
                remaining: remaining.max(0.0),
            }));
        }
    }
    Ok(None)
}
