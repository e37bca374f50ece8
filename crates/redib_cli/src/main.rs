//! Operator entry point for the ReDIB portal core.
//!
//! # Responsibility
//! - Run the periodic sweeps from cron (`daily`, `weekly`).
//! - Print call-level resolution progress and assign evaluators to a call.
//! - Keep output line-oriented `key=value` for scripting.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use redib_core::clock::now_epoch_ms;
use redib_core::service::call_service::CallService;
use redib_core::service::evaluation_service::EvaluationService;
use redib_core::service::periodic;
use redib_core::{open_db, PortalConfig, ResolutionService};
use rusqlite::Connection;
use std::path::PathBuf;

/// ReDIB competitive open access portal maintenance.
#[derive(Parser)]
#[command(name = "redib")]
#[command(about = "Periodic sweeps and reports for the ReDIB access portal", long_about = None)]
struct Cli {
    /// JSON config file; defaults apply when it does not exist.
    #[arg(long, env = "REDIB_CONFIG", default_value = "redib.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acceptance deadlines plus feasibility and evaluation reminders.
    Daily,
    /// Publication follow-ups.
    Weekly,
    /// Resolution progress of one call.
    Summary {
        /// Call code, e.g. COA-2025-01
        call_code: String,
    },
    /// Closes an open call and assigns evaluators to its pending applications.
    Assign {
        call_code: String,
    },
    /// Prints the core version.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Commands::Version = cli.command {
        println!("redib_core ping={}", redib_core::ping());
        println!("redib_core version={}", redib_core::core_version());
        return Ok(());
    }

    let config = PortalConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(log_dir) = &config.log_dir {
        redib_core::init_logging(&config.log_level, &log_dir.to_string_lossy())
            .map_err(anyhow::Error::msg)
            .context("initializing logging")?;
    }
    let conn = open_db(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let now = now_epoch_ms();

    match cli.command {
        Commands::Daily => {
            let report = periodic::run_daily(&conn, &config, now)?;
            println!("expired={}", report.acceptance.expired);
            println!("acceptance_reminders={}", report.acceptance.reminders_sent);
            println!("feasibility_reminders={}", report.feasibility_reminders);
            println!("evaluation_reminders={}", report.evaluation_reminders);
        }
        Commands::Weekly => {
            let report = periodic::run_weekly(&conn, &config, now)?;
            println!("publication_followups={}", report.publication_followups);
        }
        Commands::Summary { call_code } => print_summary(&conn, &call_code)?,
        Commands::Assign { call_code } => {
            let call = find_call(&conn, &call_code)?;
            let mut rng = rand::thread_rng();
            let report = EvaluationService::new(&conn).assign_evaluators_to_call(
                call.id,
                config.evaluators_per_application as usize,
                &mut rng,
                now,
            )?;
            println!("call_closed={}", report.call_closed);
            println!("applications={}", report.applications);
            println!("evaluations={}", report.evaluations);
        }
        Commands::Version => {}
    }
    Ok(())
}

fn find_call(conn: &Connection, call_code: &str) -> Result<redib_core::model::call::Call> {
    match CallService::new(conn).get_call_by_code(call_code)? {
        Some(call) => Ok(call),
        None => bail!("unknown call `{call_code}`"),
    }
}

fn print_summary(conn: &Connection, call_code: &str) -> Result<()> {
    let call = find_call(conn, call_code)?;
    let service = ResolutionService::new(conn);
    let summary = service.resolution_summary(call.id)?;
    println!("call={}", call.code);
    println!("total={}", summary.total);
    println!("evaluated={}", summary.evaluated);
    println!("accepted={}", summary.accepted);
    println!("pending={}", summary.pending);
    println!("rejected={}", summary.rejected);
    println!("competitive_funding={}", summary.competitive_funding);
    match summary.average_score {
        Some(score) => println!("average_score={score:.2}"),
        None => println!("average_score="),
    }
    println!("locked={}", summary.is_locked);
    println!("all_resolved={}", summary.all_resolved);

    for hours in service.hours_availability(call.id)? {
        println!(
            "equipment={} offered={:.1} allocated={:.1} remaining={:.1} over_allocated={}",
            hours.equipment_name, hours.offered, hours.allocated, hours.remaining, hours.over_allocated
        );
    }
    Ok(())
}
