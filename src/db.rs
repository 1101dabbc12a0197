//! SQLite connection pool.
//!
//! The ride tables are written by other processes, so the pool uses WAL and
//! waits on locks instead of failing immediately. Lock waits and connection
//! acquisition are bounded by the per-call timeout, so a stuck database
//! surfaces as a store outage rather than a hung run.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

const MAX_LOCK_WAIT: Duration = Duration::from_secs(30);

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let wait = config.per_call_timeout().min(MAX_LOCK_WAIT);
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(wait);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(wait)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    Ok(pool)
}

/// A migrated single-connection in-memory database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    crate::migrate::apply(&pool).await?;
    Ok(pool)
}
