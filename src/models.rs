//! Core data types that flow through a report run.
//!
//! A run reads [`RideRecord`]s, renders them into a [`ReportArtifact`],
//! wraps the artifact in a [`NotificationRequest`] and, on success, gets a
//! [`DeliveryReceipt`] back from the email service.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::report::ReportSummary;
use crate::window::ReportWindow;

/// One completed ride as read from the ride store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideRecord {
    pub ride_id: i64,
    pub rider_id: i64,
    pub bike_id: i64,
    pub started_at: DateTime<Utc>,
    /// Ride length in seconds (longest elapsed time of the ride's readings).
    pub duration_secs: i64,
    pub rider_gender: Option<String>,
    pub avg_heart_rate: Option<f64>,
    pub avg_power: Option<f64>,
}

/// The rendered report of a single run.
///
/// The body is reference-counted so the notification built from it shares
/// the same bytes instead of holding a second copy.
#[derive(Debug, Clone)]
pub struct ReportArtifact {
    body: Arc<str>,
    digest: String,
    generated_at: DateTime<Utc>,
    window: ReportWindow,
    summary: ReportSummary,
}

impl ReportArtifact {
    pub fn new(
        body: String,
        window: ReportWindow,
        summary: ReportSummary,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let digest = body_digest(&body);
        Self {
            body: Arc::from(body),
            digest,
            generated_at,
            window,
            summary,
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Hex SHA-256 of the body.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn window(&self) -> &ReportWindow {
        &self.window
    }

    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }

    pub(crate) fn shared_body(&self) -> Arc<str> {
        Arc::clone(&self.body)
    }
}

/// An email send request. Immutable once built.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    recipient: String,
    sender: String,
    subject: String,
    body: Arc<str>,
}

impl NotificationRequest {
    pub fn new(
        recipient: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Build a request whose body is the artifact's own buffer.
    pub fn for_artifact(
        recipient: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        artifact: &ReportArtifact,
    ) -> Self {
        Self::new(recipient, sender, subject, artifact.shared_body())
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn body_digest(&self) -> String {
        body_digest(&self.body)
    }
}

/// Acknowledgment returned by the delivery service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReceipt {
    pub token: String,
    pub accepted_at: DateTime<Utc>,
}

pub fn body_digest(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}
