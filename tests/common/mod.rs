//! In-memory stores, transports and sinks for driving the orchestrator.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ride_report::error::{NotifyError, StoreError};
use ride_report::models::{DeliveryReceipt, NotificationRequest, RideRecord};
use ride_report::notify::{EmailTransport, Notifier};
use ride_report::orchestrator::{Orchestrator, OrchestratorSettings, RunResult};
use ride_report::report::ReportGenerator;
use ride_report::retry::RetryPolicy;
use ride_report::runlog::RunSink;
use ride_report::store::RideStore;

pub const RECIPIENT: &str = "ops@example.com";
pub const SENDER: &str = "reports@example.com";

/// 09:30 UTC on 2024-03-05, which reports on 2024-03-04.
pub fn trigger() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap()
}

pub fn ride(id: i64, hour: u32, secs: i64) -> RideRecord {
    RideRecord {
        ride_id: id,
        rider_id: id,
        bike_id: id,
        started_at: Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap(),
        duration_secs: secs,
        rider_gender: None,
        avg_heart_rate: None,
        avg_power: None,
    }
}

pub fn three_rides() -> Vec<RideRecord> {
    vec![ride(1, 7, 600), ride(2, 12, 900), ride(3, 18, 1200)]
}

/// What a store call does.
pub enum StoreStep {
    Rides(Vec<RideRecord>),
    Fail(StoreError),
    Hang,
}

/// Plays back scripted steps; once exhausted it keeps returning `fallback`
/// rides. Tracks how many calls overlap.
pub struct ScriptedStore {
    script: Mutex<VecDeque<StoreStep>>,
    fallback: Vec<RideRecord>,
    delay: Duration,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(fallback: Vec<RideRecord>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_steps(self, steps: Vec<StoreStep>) -> Self {
        *self.script.lock().unwrap() = steps.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RideStore for ScriptedStore {
    async fn rides_between(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<RideRecord>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let step = self.script.lock().unwrap().pop_front();
        let result = match step {
            Some(StoreStep::Rides(rides)) => Ok(rides),
            Some(StoreStep::Fail(e)) => Err(e),
            Some(StoreStep::Hang) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                return std::future::pending().await;
            }
            None => Ok(self.fallback.clone()),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A delivered message as seen by the transport.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

pub enum SendStep {
    Accept,
    Fail(NotifyError),
    Hang,
}

/// Records every send; plays back scripted outcomes, then accepts.
pub struct RecordingTransport {
    script: Mutex<VecDeque<SendStep>>,
    pub attempts: AtomicUsize,
    pub sent: Mutex<Vec<SentMessage>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_steps(Vec::new())
    }

    pub fn with_steps(steps: Vec<SendStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, NotifyError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(SendStep::Fail(e)) => Err(e),
            Some(SendStep::Hang) => std::future::pending().await,
            Some(SendStep::Accept) | None => {
                self.sent.lock().unwrap().push(SentMessage {
                    recipient: request.recipient().to_string(),
                    subject: request.subject().to_string(),
                    body: request.body().to_string(),
                });
                Ok(DeliveryReceipt {
                    token: format!("msg-{}", n),
                    accepted_at: Utc::now(),
                })
            }
        }
    }
}

/// Collects run results in memory.
#[derive(Default)]
pub struct MemorySink {
    pub results: Mutex<Vec<RunResult>>,
}

impl MemorySink {
    pub fn results(&self) -> Vec<RunResult> {
        self.results.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, result: &RunResult) -> anyhow::Result<()> {
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }
}

/// A sink that always fails.
pub struct BrokenSink;

#[async_trait]
impl RunSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn record(&self, _result: &RunResult) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        recipient: RECIPIENT.to_string(),
        sender: SENDER.to_string(),
        subject_template: "Daily ride report for {date}".to_string(),
        timezone: chrono_tz::UTC,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
        },
    }
}

/// Orchestrator over the given fakes with a 5s per-call timeout.
pub fn orchestrator(
    store: Arc<ScriptedStore>,
    transport: Arc<RecordingTransport>,
    sink: Arc<MemorySink>,
) -> Orchestrator {
    let timeout = Duration::from_secs(5);
    Orchestrator::new(
        ReportGenerator::new(store, timeout),
        Notifier::new(transport, timeout),
        settings(),
    )
    .with_sink(sink)
}
