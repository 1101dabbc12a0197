use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::OrchestratorSettings;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub report: ReportConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    pub recipient: String,
    pub sender: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_subject() -> String {
    "Daily ride report for {date}".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_per_call_secs")]
    pub per_call_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            per_call_secs: default_per_call_secs(),
        }
    }
}

fn default_per_call_secs() -> u64 {
    30
}

/// What to do with a trigger that arrives while a run is still active.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    #[default]
    Drop,
    Queue,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_fire_at")]
    pub fire_at: String,
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fire_at: default_fire_at(),
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

fn default_fire_at() -> String {
    "09:30".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            outbox_dir: default_outbox_dir(),
        }
    }
}

fn default_transport() -> String {
    "http".to_string()
}
fn default_api_key_env() -> String {
    "RIDEREPORT_EMAIL_API_KEY".to_string()
}
fn default_outbox_dir() -> PathBuf {
    PathBuf::from("./data/outbox")
}

impl Config {
    /// Reference timezone for report windows. Validated by [`load_config`].
    pub fn timezone(&self) -> Result<Tz> {
        self.report
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("report.timezone: {}", e))
    }

    /// Local time of day the scheduler fires.
    pub fn fire_at(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.schedule.fire_at, "%H:%M")
            .with_context(|| format!("schedule.fire_at must be HH:MM, got '{}'", self.schedule.fire_at))
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.per_call_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_base: Duration::from_millis(self.retry.backoff_base_ms),
            backoff_max: Duration::from_millis(self.retry.backoff_max_ms),
        }
    }

    /// The explicit settings handed to the orchestrator.
    pub fn settings(&self) -> Result<OrchestratorSettings> {
        Ok(OrchestratorSettings {
            recipient: self.report.recipient.clone(),
            sender: self.report.sender.clone(),
            subject_template: self.report.subject.clone(),
            timezone: self.timezone()?,
            retry: self.retry_policy(),
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.report.recipient.trim().is_empty() {
        bail!("report.recipient must not be empty");
    }
    if config.report.sender.trim().is_empty() {
        bail!("report.sender must not be empty");
    }
    config.timezone()?;

    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.backoff_max_ms < config.retry.backoff_base_ms {
        bail!("retry.backoff_max_ms must be >= retry.backoff_base_ms");
    }
    if config.timeouts.per_call_secs == 0 {
        bail!("timeouts.per_call_secs must be > 0");
    }
    config.fire_at()?;

    match config.email.transport.as_str() {
        "http" => {
            let Some(endpoint) = config.email.endpoint.as_deref() else {
                bail!("email.endpoint must be specified when transport is 'http'");
            };
            let url = reqwest::Url::parse(endpoint)
                .with_context(|| format!("email.endpoint is not a valid URL: '{}'", endpoint))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!(
                    "email.endpoint must be an http or https URL, got scheme '{}'",
                    url.scheme()
                );
            }
        }
        "outbox" => {}
        other => bail!(
            "Unknown email transport: '{}'. Must be http or outbox.",
            other
        ),
    }

    Ok(config)
}
