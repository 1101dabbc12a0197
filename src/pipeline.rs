//! Wiring and the `run`, `preview` and `schedule` commands.
//!
//! [`build_orchestrator`] assembles the production pipeline from a
//! [`Config`]: SQLite ride store → report generator → notifier over the
//! configured transport, with run results going to the log and the
//! `report_runs` table.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::notify::{create_transport, Notifier};
use crate::orchestrator::{Orchestrator, RunResult};
use crate::report::ReportGenerator;
use crate::runlog::{SqliteRunLog, TracingSink};
use crate::scheduler::Scheduler;
use crate::store::SqliteRideStore;
use crate::window::ReportWindow;

/// Build the production orchestrator on top of an open pool.
pub fn build_orchestrator(config: &Config, pool: SqlitePool) -> Result<Orchestrator> {
    let timeout = config.per_call_timeout();
    let store = Arc::new(SqliteRideStore::new(pool.clone()));
    let generator = ReportGenerator::new(store, timeout);
    let notifier = Notifier::new(create_transport(&config.email, timeout)?, timeout);

    Ok(Orchestrator::new(generator, notifier, config.settings()?)
        .with_sink(Arc::new(TracingSink))
        .with_sink(Arc::new(SqliteRunLog::new(pool))))
}

/// The trigger instant that reports on `date`, or now when no date is given.
pub fn trigger_for(config: &Config, date: Option<NaiveDate>) -> Result<DateTime<Utc>> {
    match date {
        None => Ok(Utc::now()),
        Some(d) => ReportWindow::for_date(d, config.timezone()?)
            .map(|w| w.end)
            .ok_or_else(|| anyhow!("cannot build a report window for {}", d)),
    }
}

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            token.cancel();
        }
    });
}

/// Execute a single run and print its result. Returns the result so the
/// caller can pick an exit code.
pub async fn run_report(config: &Config, date: Option<NaiveDate>, json: bool) -> Result<RunResult> {
    let pool = db::connect(config).await?;
    let orchestrator = build_orchestrator(config, pool.clone())?;
    let trigger = trigger_for(config, date)?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let result = orchestrator.run(trigger, &cancel).await;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(result)
}

fn print_result(result: &RunResult) {
    println!("Run {}: {}", result.run_id, result.outcome);
    println!("  Report date:          {}", result.report_date);
    println!(
        "  Window:               [{}, {})",
        result.window_start.format("%Y-%m-%dT%H:%M:%SZ"),
        result.window_end.format("%Y-%m-%dT%H:%M:%SZ")
    );
    println!("  Generation attempts:  {}", result.generation_attempts);
    println!("  Delivery attempts:    {}", result.delivery_attempts);
    if let Some(digest) = &result.artifact_digest {
        println!("  Report digest:        {}", digest);
    }
    if let Some(receipt) = &result.receipt {
        println!("  Receipt:              {}", receipt.token);
    }
    if let Some(state) = result.failed_in {
        println!("  Failed in:            {}", state);
    }
    if let Some(detail) = &result.detail {
        println!("  Reason:               {}", detail);
    }
}

/// Generate the report for a day without sending it.
///
/// The HTML goes to `output` when given, otherwise to stdout.
pub async fn run_preview(config: &Config, date: Option<NaiveDate>, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteRideStore::new(pool.clone()));
    let generator = ReportGenerator::new(store, config.per_call_timeout());

    let trigger = trigger_for(config, date)?;
    let window = ReportWindow::for_trigger(trigger, config.timezone()?)
        .ok_or_else(|| anyhow!("cannot build a report window for trigger {}", trigger))?;

    let artifact = generator.generate(&window).await;
    pool.close().await;
    let artifact = artifact?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, artifact.body())?;
            println!(
                "Wrote report for {} ({} rides) to {}",
                window.date,
                artifact.summary().ride_count,
                path.display()
            );
        }
        None => println!("{}", artifact.body()),
    }
    Ok(())
}

/// Run the daily scheduler until Ctrl-C.
pub async fn run_schedule(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let orchestrator = Arc::new(build_orchestrator(config, pool.clone())?);

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let scheduler = Scheduler::new(
        orchestrator,
        config.fire_at()?,
        config.schedule.overlap_policy,
        shutdown,
    );
    scheduler.run_daily().await;

    pool.close().await;
    Ok(())
}
