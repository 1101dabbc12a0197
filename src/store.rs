//! Read access to ride data.
//!
//! [`RideStore`] is the seam between the report generator and the data
//! store. [`SqliteRideStore`] is the production implementation; tests plug
//! in their own stores to simulate outages and bad rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::models::RideRecord;

/// Read-only query interface over completed rides.
#[async_trait]
pub trait RideStore: Send + Sync {
    /// All rides whose start time lies in `[start, end)`.
    ///
    /// Ordering must be deterministic for a given data set.
    async fn rides_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RideRecord>, StoreError>;
}

/// SQLite-backed ride store.
#[derive(Clone)]
pub struct SqliteRideStore {
    pool: SqlitePool,
}

impl SqliteRideStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RideStore for SqliteRideStore {
    async fn rides_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RideRecord>, StoreError> {
        // Duration and averages come from the ride's readings; a ride with
        // no readings yet has zero duration and no averages.
        let rows = sqlx::query(
            r#"
            SELECT
                r.ride_id,
                r.rider_id,
                r.bike_id,
                r.start_time,
                COALESCE(MAX(rd.elapsed_time), 0) AS duration_secs,
                AVG(rd.heart_rate) AS avg_heart_rate,
                AVG(rd.power) AS avg_power,
                rr.gender AS rider_gender
            FROM rides r
            LEFT JOIN readings rd ON rd.ride_id = r.ride_id
            LEFT JOIN riders rr ON rr.rider_id = r.rider_id
            WHERE r.start_time >= ? AND r.start_time < ?
            GROUP BY r.ride_id
            ORDER BY r.start_time ASC, r.ride_id ASC
            "#,
        )
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await?;

        let mut rides = Vec::with_capacity(rows.len());
        for row in &rows {
            let start_time: i64 = row.try_get("start_time")?;
            let started_at = DateTime::from_timestamp(start_time, 0).ok_or_else(|| {
                StoreError::Malformed(format!("start_time out of range: {}", start_time))
            })?;
            rides.push(RideRecord {
                ride_id: row.try_get("ride_id")?,
                rider_id: row.try_get("rider_id")?,
                bike_id: row.try_get("bike_id")?,
                started_at,
                duration_secs: row.try_get("duration_secs")?,
                rider_gender: row.try_get("rider_gender")?,
                avg_heart_rate: row.try_get("avg_heart_rate")?,
                avg_power: row.try_get("avg_power")?,
            });
        }

        Ok(rides)
    }
}
