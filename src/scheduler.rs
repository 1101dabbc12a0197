//! Daily triggering with an overlap guard.
//!
//! At most one run is in flight at any time. A trigger that arrives while a
//! run is active is handled by the configured [`OverlapPolicy`]:
//!
//! - `drop`: the trigger is discarded with a warning.
//! - `queue`: the trigger waits for the active run to finish. Only one
//!   trigger can wait; further ones are dropped.
//!
//! Any trigger, immediate or queued, whose report day has already been
//! delivered is skipped, so a day is never emailed twice by the same
//! scheduler. A failed day is still retried by the next trigger.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OverlapPolicy;
use crate::orchestrator::{Orchestrator, RunResult};

/// First instant strictly after `now` at which the local wall clock in `tz`
/// reads `fire_at`.
///
/// When `fire_at` falls in a DST gap the run fires one hour later in local
/// terms; when it is ambiguous the earlier instant is used.
pub fn next_fire(now: DateTime<Utc>, fire_at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let mut date = now.with_timezone(&tz).date_naive();
    // A gap never spans more than a day, so two days always find a candidate.
    for _ in 0..3 {
        if let Some(at) = local_instant(date, fire_at, tz) {
            if at > now {
                return at;
            }
        }
        date = match date.checked_add_days(Days::new(1)) {
            Some(d) => d,
            None => break,
        };
    }
    now + chrono::Duration::days(1)
}

fn local_instant(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}

/// What happened to a trigger.
#[derive(Debug)]
pub enum Dispatch {
    /// A run started immediately.
    Started(JoinHandle<Option<RunResult>>),
    /// The trigger is waiting for the active run. Resolves to `None` if it
    /// was skipped or cancelled before starting.
    Queued(JoinHandle<Option<RunResult>>),
    /// A run was already active and the trigger was discarded.
    Dropped,
}

impl Dispatch {
    /// Wait for the run this trigger produced, if any.
    pub async fn into_result(self) -> Option<RunResult> {
        match self {
            Dispatch::Started(handle) | Dispatch::Queued(handle) => handle.await.ok().flatten(),
            Dispatch::Dropped => None,
        }
    }
}

/// Fires the orchestrator once per local day and keeps runs from
/// overlapping.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    fire_at: NaiveTime,
    policy: OverlapPolicy,
    gate: Arc<Semaphore>,
    queued: Arc<AtomicBool>,
    last_delivered: Arc<Mutex<Option<NaiveDate>>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        fire_at: NaiveTime,
        policy: OverlapPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            fire_at,
            policy,
            gate: Arc::new(Semaphore::new(1)),
            queued: Arc::new(AtomicBool::new(false)),
            last_delivered: Arc::new(Mutex::new(None)),
            shutdown,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.gate.available_permits() == 0
    }

    /// Start a run for `at`, or apply the overlap policy if one is active.
    pub fn trigger(&self, at: DateTime<Utc>) -> Dispatch {
        if let Ok(permit) = self.gate.clone().try_acquire_owned() {
            return Dispatch::Started(self.spawn_run(at, permit));
        }

        match self.policy {
            OverlapPolicy::Drop => {
                warn!(trigger = %at, "a report run is already active, dropping trigger");
                Dispatch::Dropped
            }
            OverlapPolicy::Queue => {
                if self
                    .queued
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    warn!(trigger = %at, "a trigger is already queued, dropping trigger");
                    return Dispatch::Dropped;
                }
                info!(trigger = %at, "a report run is already active, queueing trigger");
                Dispatch::Queued(self.spawn_queued(at))
            }
        }
    }

    fn spawn_run(&self, at: DateTime<Utc>, permit: OwnedSemaphorePermit) -> JoinHandle<Option<RunResult>> {
        let orchestrator = self.orchestrator.clone();
        let last_delivered = self.last_delivered.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move { run_once(&orchestrator, &last_delivered, at, &cancel, permit).await })
    }

    fn spawn_queued(&self, at: DateTime<Utc>) -> JoinHandle<Option<RunResult>> {
        let gate = self.gate.clone();
        let queued = self.queued.clone();
        let last_delivered = self.last_delivered.clone();
        let orchestrator = self.orchestrator.clone();
        let shutdown = self.shutdown.clone();
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    queued.store(false, Ordering::SeqCst);
                    return None;
                }
                permit = gate.acquire_owned() => permit.ok()?,
            };
            queued.store(false, Ordering::SeqCst);
            run_once(&orchestrator, &last_delivered, at, &cancel, permit).await
        })
    }

    /// Fire once per day at the configured local time until `shutdown` is
    /// cancelled. Cancelling also cancels the active run; this returns after
    /// it has recorded its result.
    pub async fn run_daily(&self) {
        let tz = self.orchestrator.settings().timezone;
        info!(fire_at = %self.fire_at, timezone = %tz, policy = ?self.policy, "scheduler started");

        loop {
            let now = Utc::now();
            let next = next_fire(now, self.fire_at, tz);
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(next = %next, wait_secs = wait.as_secs(), "waiting for next trigger");

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.trigger(next) {
                Dispatch::Started(_) => debug!(trigger = %next, "run started"),
                Dispatch::Queued(_) => debug!(trigger = %next, "run queued"),
                Dispatch::Dropped => {}
            }
        }

        // Wait for the active run to wind down.
        let _ = self.gate.acquire().await;
        info!("scheduler stopped");
    }
}

/// Run for `at` while holding `permit`, unless that report day was already
/// delivered by this scheduler.
async fn run_once(
    orchestrator: &Orchestrator,
    last_delivered: &Mutex<Option<NaiveDate>>,
    at: DateTime<Utc>,
    cancel: &CancellationToken,
    permit: OwnedSemaphorePermit,
) -> Option<RunResult> {
    let report_date = orchestrator.window_for(at).map(|w| w.date);
    let already_delivered = match last_delivered.lock() {
        Ok(last) => report_date.is_some() && *last == report_date,
        Err(_) => false,
    };
    if already_delivered {
        info!(trigger = %at, "report for this day was already delivered, skipping trigger");
        return None;
    }

    let result = orchestrator.run(at, cancel).await;
    if result.is_delivered() {
        if let Ok(mut last) = last_delivered.lock() {
            *last = Some(result.report_date);
        }
    }
    drop(permit);
    Some(result)
}
