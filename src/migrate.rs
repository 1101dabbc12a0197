use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS riders (
            rider_id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            gender TEXT,
            birthdate TEXT,
            email TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bikes (
            bike_id INTEGER PRIMARY KEY,
            serial_number TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // start_time is unix seconds (UTC)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rides (
            ride_id INTEGER PRIMARY KEY,
            rider_id INTEGER NOT NULL,
            bike_id INTEGER NOT NULL,
            start_time INTEGER NOT NULL,
            FOREIGN KEY (rider_id) REFERENCES riders(rider_id),
            FOREIGN KEY (bike_id) REFERENCES bikes(bike_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            reading_id INTEGER PRIMARY KEY,
            ride_id INTEGER NOT NULL,
            heart_rate INTEGER,
            power REAL,
            rpm INTEGER,
            resistance INTEGER,
            elapsed_time INTEGER NOT NULL,
            FOREIGN KEY (ride_id) REFERENCES rides(ride_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS report_runs (
            run_id TEXT PRIMARY KEY,
            report_date TEXT NOT NULL,
            window_start INTEGER NOT NULL,
            window_end INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            terminal_state TEXT NOT NULL,
            detail TEXT,
            generation_attempts INTEGER NOT NULL,
            delivery_attempts INTEGER NOT NULL,
            artifact_digest TEXT,
            receipt_token TEXT,
            triggered_at INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rides_start_time ON rides(start_time)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_readings_ride_id ON readings(ride_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_report_runs_finished_at ON report_runs(finished_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
