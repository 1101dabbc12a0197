//! Typed failures for the report pipeline.
//!
//! Each external step has its own error enum so the orchestrator can decide
//! between retrying and failing the run without string matching:
//!
//! | Error | Retryable |
//! |-------|-----------|
//! | [`ReportError::InvalidWindow`] | no |
//! | [`ReportError::DataStoreUnavailable`] | yes |
//! | [`ReportError::Render`] | no |
//! | [`NotifyError::InvalidRequest`] | no |
//! | [`NotifyError::DeliveryTransient`] | yes |
//! | [`NotifyError::DeliveryRejected`] | no |

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure raised by a [`RideStore`](crate::store::RideStore) query.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection refused, pool exhausted, I/O failure.
    #[error("ride store unavailable: {0}")]
    Unavailable(String),

    /// A row could not be decoded into a ride record.
    #[error("malformed ride row: {0}")]
    Malformed(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Malformed(e.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Failure of the report generation step.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid report window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("data store unavailable: {0}")]
    DataStoreUnavailable(String),

    #[error("cannot render report: {0}")]
    Render(String),
}

impl ReportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReportError::DataStoreUnavailable(_))
    }
}

impl From<StoreError> for ReportError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => ReportError::DataStoreUnavailable(msg),
            StoreError::Malformed(msg) => ReportError::Render(msg),
        }
    }
}

/// Failure of the delivery step.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Rejected locally; no network call was made.
    #[error("invalid notification request: {0}")]
    InvalidRequest(String),

    /// Throttling, 5xx, network fault or timeout.
    #[error("transient delivery failure: {0}")]
    DeliveryTransient(String),

    /// The delivery service refused the message.
    #[error("delivery rejected: {0}")]
    DeliveryRejected(String),
}

impl NotifyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::DeliveryTransient(_))
    }
}
