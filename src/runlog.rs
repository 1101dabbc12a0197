//! Where finished runs are reported.
//!
//! Every [`RunResult`] goes to each configured [`RunSink`]. A sink that
//! fails is logged and skipped; it never changes the outcome of the run.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{error, info};

use crate::orchestrator::RunResult;

/// Receives the result of every run.
#[async_trait]
pub trait RunSink: Send + Sync {
    fn name(&self) -> &str;

    async fn record(&self, result: &RunResult) -> Result<()>;
}

/// Emits one structured log event per run. Failed runs are logged at
/// `ERROR` with the failing step and reason so log-based alerting can pick
/// them up.
pub struct TracingSink;

#[async_trait]
impl RunSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn record(&self, result: &RunResult) -> Result<()> {
        if result.is_delivered() {
            info!(
                run_id = %result.run_id,
                report_date = %result.report_date,
                generation_attempts = result.generation_attempts,
                delivery_attempts = result.delivery_attempts,
                digest = result.artifact_digest.as_deref().unwrap_or(""),
                receipt = result.receipt.as_ref().map(|r| r.token.as_str()).unwrap_or(""),
                "daily report delivered"
            );
        } else {
            error!(
                run_id = %result.run_id,
                report_date = %result.report_date,
                outcome = %result.outcome,
                failed_in = result.failed_in.map(|s| s.as_str()).unwrap_or("unknown"),
                reason = result.detail.as_deref().unwrap_or(""),
                generation_attempts = result.generation_attempts,
                delivery_attempts = result.delivery_attempts,
                "daily report run failed"
            );
        }
        Ok(())
    }
}

/// Persists run results to the `report_runs` table.
#[derive(Clone)]
pub struct SqliteRunLog {
    pool: SqlitePool,
}

/// One row of run history.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub report_date: String,
    pub outcome: String,
    pub terminal_state: String,
    pub detail: Option<String>,
    pub generation_attempts: i64,
    pub delivery_attempts: i64,
    pub artifact_digest: Option<String>,
    pub receipt_token: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl SqliteRunLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent runs first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, report_date, outcome, terminal_state, detail,
                   generation_attempts, delivery_attempts, artifact_digest,
                   receipt_token, finished_at
            FROM report_runs
            ORDER BY finished_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let finished_at: i64 = row.try_get("finished_at")?;
            records.push(RunRecord {
                run_id: row.try_get("run_id")?,
                report_date: row.try_get("report_date")?,
                outcome: row.try_get("outcome")?,
                terminal_state: row.try_get("terminal_state")?,
                detail: row.try_get("detail")?,
                generation_attempts: row.try_get("generation_attempts")?,
                delivery_attempts: row.try_get("delivery_attempts")?,
                artifact_digest: row.try_get("artifact_digest")?,
                receipt_token: row.try_get("receipt_token")?,
                finished_at: DateTime::from_timestamp(finished_at, 0).unwrap_or_default(),
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl RunSink for SqliteRunLog {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn record(&self, result: &RunResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO report_runs (
                run_id, report_date, window_start, window_end, outcome,
                terminal_state, detail, generation_attempts, delivery_attempts,
                artifact_digest, receipt_token, triggered_at, started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.run_id.to_string())
        .bind(result.report_date.to_string())
        .bind(result.window_start.timestamp())
        .bind(result.window_end.timestamp())
        .bind(result.outcome.as_str())
        .bind(result.terminal_state.as_str())
        .bind(result.detail.as_deref())
        .bind(result.generation_attempts as i64)
        .bind(result.delivery_attempts as i64)
        .bind(result.artifact_digest.as_deref())
        .bind(result.receipt.as_ref().map(|r| r.token.as_str()))
        .bind(result.triggered_at.timestamp())
        .bind(result.started_at.timestamp())
        .bind(result.finished_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
