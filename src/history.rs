//! Recent run history.
//!
//! Reads the `report_runs` table written by [`SqliteRunLog`] and prints one
//! line per run, newest first. Used by `ridereport history` to check that
//! the daily email actually went out.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db;
use crate::runlog::SqliteRunLog;

/// Run the history command.
pub async fn run_history(config: &Config, limit: i64, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let records = SqliteRunLog::new(pool.clone()).recent(limit).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No report runs recorded.");
        return Ok(());
    }

    println!(
        "  {:<12} {:<18} {:>5} {:>5}   {:<16} {}",
        "DATE", "OUTCOME", "GEN", "SEND", "FINISHED", "DETAIL"
    );
    println!("  {}", "-".repeat(76));
    for r in &records {
        println!(
            "  {:<12} {:<18} {:>5} {:>5}   {:<16} {}",
            r.report_date,
            r.outcome,
            r.generation_attempts,
            r.delivery_attempts,
            format_relative(r.finished_at, Utc::now()),
            r.detail.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// "3 hours ago" style rendering of `ts` relative to `now`.
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} min ago", delta / 60)
    } else if delta < 86_400 {
        format!("{} hours ago", delta / 3600)
    } else {
        format!("{} days ago", delta / 86_400)
    }
}
