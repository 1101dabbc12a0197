//! The generate-then-notify state machine.
//!
//! ```text
//! Idle ──trigger──▶ Generating ──artifact──▶ Notifying ──receipt──▶ Delivered
//!                       │                        │
//!                       └──────────┬─────────────┘
//!                                  ▼
//!                                Failed (GenerationFailed | DeliveryFailed | Cancelled)
//! ```
//!
//! Every call to [`Orchestrator::run`] is a fresh run: it derives its own
//! window, produces its own artifact and returns its own [`RunResult`]. The
//! artifact is moved from `Generating` into `Notifying`, so the email body is
//! always the artifact generated moments earlier by the same run.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{DeliveryReceipt, NotificationRequest, ReportArtifact};
use crate::notify::Notifier;
use crate::report::ReportGenerator;
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};
use crate::runlog::RunSink;
use crate::window::ReportWindow;

/// Run-wide settings, fixed when the orchestrator is built.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub recipient: String,
    pub sender: String,
    /// `{date}` is replaced by the reported day.
    pub subject_template: String,
    pub timezone: Tz,
    pub retry: RetryPolicy,
}

impl OrchestratorSettings {
    pub fn subject_for(&self, date: NaiveDate) -> String {
        self.subject_template.replace("{date}", &date.to_string())
    }
}

/// States of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Generating,
    Notifying,
    Delivered,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Generating => "generating",
            RunState::Notifying => "notifying",
            RunState::Delivered => "delivered",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Delivered,
    GenerationFailed,
    DeliveryFailed,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Delivered => "delivered",
            RunOutcome::GenerationFailed => "generation_failed",
            RunOutcome::DeliveryFailed => "delivery_failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, RunOutcome::Delivered)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one finished run, emitted to every [`RunSink`].
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub report_date: NaiveDate,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// `Delivered` or `Failed`.
    pub terminal_state: RunState,
    /// The step that was active when a failed run stopped.
    pub failed_in: Option<RunState>,
    pub detail: Option<String>,
    pub generation_attempts: u32,
    pub delivery_attempts: u32,
    pub artifact_digest: Option<String>,
    pub receipt: Option<DeliveryReceipt>,
    pub triggered_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn is_delivered(&self) -> bool {
        self.outcome.is_delivered()
    }
}

/// Where a run is, with the data that state owns.
enum Step {
    Idle,
    Generating {
        window: ReportWindow,
    },
    Notifying {
        artifact: ReportArtifact,
    },
    Delivered {
        receipt: DeliveryReceipt,
    },
    Failed {
        outcome: RunOutcome,
        failed_in: RunState,
        detail: String,
    },
}

impl Step {
    fn state(&self) -> RunState {
        match self {
            Step::Idle => RunState::Idle,
            Step::Generating { .. } => RunState::Generating,
            Step::Notifying { .. } => RunState::Notifying,
            Step::Delivered { .. } => RunState::Delivered,
            Step::Failed { .. } => RunState::Failed,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Step::Delivered { .. } | Step::Failed { .. })
    }
}

/// Bookkeeping for the run in progress.
struct RunContext {
    run_id: Uuid,
    trigger: DateTime<Utc>,
    window: Option<ReportWindow>,
    generation_attempts: u32,
    delivery_attempts: u32,
    artifact_digest: Option<String>,
}

/// Sequences report generation and delivery for one trigger at a time.
pub struct Orchestrator {
    generator: ReportGenerator,
    notifier: Notifier,
    settings: OrchestratorSettings,
    sinks: Vec<Arc<dyn RunSink>>,
}

impl Orchestrator {
    pub fn new(generator: ReportGenerator, notifier: Notifier, settings: OrchestratorSettings) -> Self {
        Self {
            generator,
            notifier,
            settings,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn RunSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Window a trigger at `trigger` would report on.
    pub fn window_for(&self, trigger: DateTime<Utc>) -> Option<ReportWindow> {
        ReportWindow::for_trigger(trigger, self.settings.timezone)
    }

    /// Execute one complete run for `trigger` and record its result.
    ///
    /// Never returns an error: every failure ends up in the returned
    /// [`RunResult`].
    pub async fn run(&self, trigger: DateTime<Utc>, cancel: &CancellationToken) -> RunResult {
        let started_at = Utc::now();
        let mut ctx = RunContext {
            run_id: Uuid::new_v4(),
            trigger,
            window: None,
            generation_attempts: 0,
            delivery_attempts: 0,
            artifact_digest: None,
        };

        let mut step = Step::Idle;
        while !step.is_terminal() {
            let from = step.state();
            step = self.advance(step, &mut ctx, cancel).await;
            info!(
                run_id = %ctx.run_id,
                from = %from,
                to = %step.state(),
                "run state transition"
            );
        }

        let result = self.finish(step, ctx, started_at);
        for sink in &self.sinks {
            if let Err(e) = sink.record(&result).await {
                warn!(run_id = %result.run_id, sink = sink.name(), error = %e, "failed to record run result");
            }
        }
        result
    }

    async fn advance(&self, step: Step, ctx: &mut RunContext, cancel: &CancellationToken) -> Step {
        match step {
            Step::Idle => match self.window_for(ctx.trigger) {
                Some(window) => {
                    ctx.window = Some(window);
                    Step::Generating { window }
                }
                None => Step::Failed {
                    outcome: RunOutcome::GenerationFailed,
                    failed_in: RunState::Generating,
                    detail: format!("cannot derive a report window from trigger {}", ctx.trigger),
                },
            },

            Step::Generating { window } => {
                let result = retry_with_backoff(
                    &self.settings.retry,
                    cancel,
                    "generate",
                    &mut ctx.generation_attempts,
                    || self.generator.generate(&window),
                )
                .await;

                match result {
                    Ok(artifact) => {
                        ctx.artifact_digest = Some(artifact.digest().to_string());
                        info!(
                            run_id = %ctx.run_id,
                            rides = artifact.summary().ride_count,
                            digest = artifact.digest(),
                            "report generated"
                        );
                        Step::Notifying { artifact }
                    }
                    Err(RetryError::Failed(e)) => Step::Failed {
                        outcome: RunOutcome::GenerationFailed,
                        failed_in: RunState::Generating,
                        detail: e.to_string(),
                    },
                    Err(RetryError::Cancelled) => cancelled(RunState::Generating),
                }
            }

            Step::Notifying { artifact } => {
                let request = NotificationRequest::for_artifact(
                    self.settings.recipient.as_str(),
                    self.settings.sender.as_str(),
                    self.settings.subject_for(artifact.window().date),
                    &artifact,
                );

                let result = retry_with_backoff(
                    &self.settings.retry,
                    cancel,
                    "notify",
                    &mut ctx.delivery_attempts,
                    || self.notifier.notify(&request),
                )
                .await;

                match result {
                    Ok(receipt) => Step::Delivered { receipt },
                    Err(RetryError::Failed(e)) => Step::Failed {
                        outcome: RunOutcome::DeliveryFailed,
                        failed_in: RunState::Notifying,
                        detail: e.to_string(),
                    },
                    Err(RetryError::Cancelled) => cancelled(RunState::Notifying),
                }
            }

            terminal => terminal,
        }
    }

    fn finish(&self, step: Step, ctx: RunContext, started_at: DateTime<Utc>) -> RunResult {
        let (window_start, window_end, report_date) = match &ctx.window {
            Some(w) => (w.start, w.end, w.date),
            None => (ctx.trigger, ctx.trigger, ctx.trigger.date_naive()),
        };

        let (outcome, terminal_state, failed_in, detail, receipt) = match step {
            Step::Delivered { receipt } => {
                (RunOutcome::Delivered, RunState::Delivered, None, None, Some(receipt))
            }
            Step::Failed {
                outcome,
                failed_in,
                detail,
            } => (outcome, RunState::Failed, Some(failed_in), Some(detail), None),
            // `run` only calls this with a terminal step.
            other => (
                RunOutcome::GenerationFailed,
                RunState::Failed,
                Some(other.state()),
                Some("run stopped in a non-terminal state".to_string()),
                None,
            ),
        };

        RunResult {
            run_id: ctx.run_id,
            report_date,
            window_start,
            window_end,
            outcome,
            terminal_state,
            failed_in,
            detail,
            generation_attempts: ctx.generation_attempts,
            delivery_attempts: ctx.delivery_attempts,
            artifact_digest: ctx.artifact_digest,
            receipt,
            triggered_at: ctx.trigger,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

fn cancelled(failed_in: RunState) -> Step {
    Step::Failed {
        outcome: RunOutcome::Cancelled,
        failed_in,
        detail: "run cancelled".to_string(),
    }
}
