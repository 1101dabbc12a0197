//! Bounded exponential backoff.
//!
//! Attempts are numbered from 1. There is no delay before the first attempt;
//! before attempt `n > 1` the caller waits `base * 2^(n-2)`, capped at
//! `backoff_max`: with a 1s base that is 1s, 2s, 4s, 8s, ...

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{NotifyError, ReportError};

/// Errors that may succeed if the same call is made again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ReportError {
    fn is_retryable(&self) -> bool {
        ReportError::is_retryable(self)
    }
}

impl Retryable for NotifyError {
    fn is_retryable(&self) -> bool {
        NotifyError::is_retryable(self)
    }
}

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// A non-retryable error, or the last error once attempts ran out.
    Failed(E),
    /// The token fired during a call or a backoff sleep.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before `attempt`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        self.backoff_base
            .saturating_mul(1 << exp)
            .min(self.backoff_max)
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds, fails fatally, runs out of attempts or is
/// cancelled. `attempts` is updated before every call that is actually
/// made, so the caller can report how many were made whatever the outcome.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    step: &str,
    attempts: &mut u32,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        *attempts = attempt;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = op() => r,
        };

        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && policy.allows_retry_after(attempt) => {
                warn!(
                    step,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "transient failure, retrying"
                );
            }
            Err(e) => return Err(RetryError::Failed(e)),
        }
    }
}
