//! Email delivery.
//!
//! [`Notifier`] validates a [`NotificationRequest`] and makes exactly one
//! send attempt through an [`EmailTransport`]. Retrying is the
//! orchestrator's job.
//!
//! Transports:
//! - **[`HttpEmailTransport`]**: `POST`s a JSON message to an email API.
//! - **[`OutboxTransport`]**: writes the message to a local directory.
//!
//! # HTTP status mapping
//!
//! - 2xx → delivered; the receipt token is the response's `id`/`message_id`
//! - 429 and 5xx → [`NotifyError::DeliveryTransient`]
//! - any other status → [`NotifyError::DeliveryRejected`]
//! - network errors and timeouts → [`NotifyError::DeliveryTransient`]
//! - a request that cannot be built (e.g. a malformed endpoint) →
//!   [`NotifyError::DeliveryRejected`]

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::EmailConfig;
use crate::error::NotifyError;
use crate::models::{DeliveryReceipt, NotificationRequest};

/// Something that can hand an email to a delivery service.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Short identifier used in logs (e.g. `"http"`).
    fn name(&self) -> &str;

    /// Make one send attempt.
    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, NotifyError>;
}

/// Validates requests and performs a single, time-bounded send.
pub struct Notifier {
    transport: Arc<dyn EmailTransport>,
    send_timeout: Duration,
}

impl Notifier {
    pub fn new(transport: Arc<dyn EmailTransport>, send_timeout: Duration) -> Self {
        Self {
            transport,
            send_timeout,
        }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub async fn notify(
        &self,
        request: &NotificationRequest,
    ) -> Result<DeliveryReceipt, NotifyError> {
        validate_request(request)?;

        debug!(
            transport = self.transport.name(),
            recipient = request.recipient(),
            bytes = request.body().len(),
            "sending report email"
        );

        tokio::time::timeout(self.send_timeout, self.transport.send(request))
            .await
            .map_err(|_| {
                NotifyError::DeliveryTransient(format!(
                    "send timed out after {}s",
                    self.send_timeout.as_secs_f64()
                ))
            })?
    }
}

/// Local checks run before any network call.
pub fn validate_request(request: &NotificationRequest) -> Result<(), NotifyError> {
    if !is_valid_address(request.recipient()) {
        return Err(NotifyError::InvalidRequest(format!(
            "invalid recipient address '{}'",
            request.recipient()
        )));
    }
    if request.subject().trim().is_empty() {
        return Err(NotifyError::InvalidRequest("subject is empty".into()));
    }
    if request.body().trim().is_empty() {
        return Err(NotifyError::InvalidRequest("body is empty".into()));
    }
    Ok(())
}

/// `local@domain.tld` with no whitespace and exactly one `@`.
pub fn is_valid_address(addr: &str) -> bool {
    if addr.is_empty() || addr.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

// ============ HTTP transport ============

/// Sends through a JSON email API:
///
/// ```text
/// POST {endpoint}
/// Authorization: Bearer {api_key}
/// {"from": "...", "to": ["..."], "subject": "...", "html": "..."}
/// ```
pub struct HttpEmailTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpEmailTransport {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, NotifyError> {
        let payload = serde_json::json!({
            "from": request.sender(),
            "to": [request.recipient()],
            "subject": request.subject(),
            "html": request.body(),
        });

        let mut req = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(classify_send_error)?;
        let status = response.status();

        if status.is_success() {
            let json: serde_json::Value = response.json().await.unwrap_or_default();
            let token = json
                .get("id")
                .or_else(|| json.get("message_id"))
                .and_then(|v| v.as_str())
                .unwrap_or("accepted")
                .to_string();
            return Ok(DeliveryReceipt {
                token,
                accepted_at: Utc::now(),
            });
        }

        let body_text = response.text().await.unwrap_or_default();
        let msg = format!("email API error {}: {}", status, body_text);
        if status.as_u16() == 429 || status.is_server_error() {
            Err(NotifyError::DeliveryTransient(msg))
        } else {
            Err(NotifyError::DeliveryRejected(msg))
        }
    }
}

/// A request that could not be built or was redirected away will fail the
/// same way on every attempt; only connection-level trouble is worth a retry.
fn classify_send_error(e: reqwest::Error) -> NotifyError {
    if e.is_builder() || e.is_redirect() {
        NotifyError::DeliveryRejected(format!("invalid email request: {}", e))
    } else {
        NotifyError::DeliveryTransient(e.to_string())
    }
}

// ============ Outbox transport ============

/// Writes each message into a directory as `<token>.html` plus a
/// `<token>.json` envelope.
pub struct OutboxTransport {
    dir: PathBuf,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl EmailTransport for OutboxTransport {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, NotifyError> {
        let accepted_at = Utc::now();
        let token = format!(
            "{}-{}",
            accepted_at.format("%Y%m%dT%H%M%S"),
            uuid::Uuid::new_v4().simple()
        );
        let envelope = serde_json::json!({
            "from": request.sender(),
            "to": [request.recipient()],
            "subject": request.subject(),
            "accepted_at": accepted_at.to_rfc3339(),
        });

        let io = |e: std::io::Error| NotifyError::DeliveryTransient(format!("outbox write failed: {}", e));
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;
        tokio::fs::write(self.dir.join(format!("{}.html", token)), request.body())
            .await
            .map_err(io)?;
        tokio::fs::write(
            self.dir.join(format!("{}.json", token)),
            serde_json::to_vec_pretty(&envelope).unwrap_or_default(),
        )
        .await
        .map_err(io)?;

        Ok(DeliveryReceipt { token, accepted_at })
    }
}

/// Build the transport named in `[email]`.
///
/// The API key is read from the environment once, here, never mid-run.
pub fn create_transport(config: &EmailConfig, timeout: Duration) -> Result<Arc<dyn EmailTransport>> {
    match config.transport.as_str() {
        "http" => {
            let endpoint = config
                .endpoint
                .clone()
                .context("email.endpoint required for http transport")?;
            let api_key = std::env::var(&config.api_key_env).ok();
            Ok(Arc::new(HttpEmailTransport::new(endpoint, api_key, timeout)?))
        }
        "outbox" => Ok(Arc::new(OutboxTransport::new(config.outbox_dir.clone()))),
        other => bail!("Unknown email transport: {}", other),
    }
}
