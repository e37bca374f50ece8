//! Daily and weekly sweeps run by the external scheduler.
//!
//! Each sweep only needs "now"; windows come from `PortalConfig`.

use crate::config::PortalConfig;
use crate::service::acceptance_service::{AcceptanceService, DeadlineSweepReport};
use crate::service::error::WorkflowResult;
use crate::service::evaluation_service::EvaluationService;
use crate::service::feasibility_service::FeasibilityService;
use crate::service::publication_service::PublicationService;
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyReport {
    pub acceptance: DeadlineSweepReport,
    pub feasibility_reminders: usize,
    pub evaluation_reminders: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeeklyReport {
    pub publication_followups: usize,
}

pub fn run_daily(conn: &Connection, config: &PortalConfig, now_ms: i64) -> WorkflowResult<DailyReport> {
    let acceptance = AcceptanceService::new(conn)
        .process_acceptance_deadlines(now_ms, config.acceptance_reminder_days)?;
    let feasibility_reminders = FeasibilityService::new(conn).send_feasibility_reminders(
        now_ms,
        config.feasibility_reminder_after_days,
        config.feasibility_reminder_interval_days,
    )?;
    let evaluation_reminders = EvaluationService::new(conn)
        .send_evaluation_reminders(now_ms, config.evaluation_reminder_days)?;

    let report = DailyReport {
        acceptance,
        feasibility_reminders,
        evaluation_reminders,
    };
    info!(
        "event=daily_sweep module=periodic status=ok expired={} acceptance_reminders={} feasibility_reminders={} evaluation_reminders={}",
        report.acceptance.expired,
        report.acceptance.reminders_sent,
        report.feasibility_reminders,
        report.evaluation_reminders
    );
    Ok(report)
}

pub fn run_weekly(conn: &Connection, config: &PortalConfig, now_ms: i64) -> WorkflowResult<WeeklyReport> {
    let publication_followups = PublicationService::new(conn).send_publication_followups(
        now_ms,
        config.publication_followup_after_days,
        config.publication_followup_window_days,
    )?;
    info!(
        "event=weekly_sweep module=periodic status=ok publication_followups={publication_followups}"
    );
    Ok(WeeklyReport {
        publication_followups,
    })
}
