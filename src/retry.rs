//! Bounded retry as an explicit state machine.
//!
//! ```text
//! ATTEMPTING ──ok──────────────▶ SUCCESS
//!     │ transient, budget left
//!     ▼
//! RETRY_WAIT ──delay──▶ ATTEMPTING
//!     │ transient, budget spent        permanent
//!     ▼                                    ▼
//! EXHAUSTED                             ABORTED
//! ```
//!
//! [`RetryPolicy::next`] is the pure transition function; [`run`] drives it
//! with real sleeps and records a [`FetchAttempt`] per attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::error::{RetryError, Retryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay between every attempt.
    #[default]
    Fixed,
    /// `base * 2^(n-1)`, capped at `max_delay`.
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(2, Duration::from_secs(5))
    }
}

/// What a single attempt produced, as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    RetryWait { attempt: u32, delay: Duration },
    Success { attempt: u32 },
    Exhausted { attempts: u32 },
    Aborted { attempt: u32 },
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff: Backoff::Fixed,
            max_delay: base_delay,
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff: Backoff::Exponential,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    /// Initial attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.base_delay
                    .checked_mul(1u32 << shift)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }

    /// Transition out of `ATTEMPTING` for `attempt` given its outcome.
    pub fn next(&self, attempt: u32, outcome: Outcome) -> RetryState {
        match outcome {
            Outcome::Success => RetryState::Success { attempt },
            Outcome::Permanent => RetryState::Aborted { attempt },
            Outcome::Transient if attempt < self.max_attempts() => RetryState::RetryWait {
                attempt,
                delay: self.delay_after(attempt),
            },
            Outcome::Transient => RetryState::Exhausted { attempts: attempt },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::TransientFailure => "transient_failure",
            AttemptOutcome::PermanentFailure => "permanent_failure",
        }
    }
}

/// Bookkeeping for one attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchAttempt {
    pub url: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
}

/// Identity of the thing being retried, for logs and metrics.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    pub component: &'static str,
    pub source: &'a str,
    pub url: &'a str,
}

/// A successful value plus the attempts it took.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub attempts: Vec<FetchAttempt>,
}

/// Drive `op` through the retry state machine.
///
/// `op` receives the 1-based attempt number. Every attempt is logged with
/// source, attempt index and outcome, and recorded in the returned list.
pub async fn run<T, E, F, Fut>(
    policy: &RetryPolicy,
    ctx: AttemptContext<'_>,
    mut op: F,
) -> (Result<T, RetryError<E>>, Vec<FetchAttempt>)
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = Vec::with_capacity(max_attempts as usize);
    let mut attempt = 1u32;

    loop {
        match op(attempt).await {
            Ok(value) => {
                record(&mut attempts, ctx, attempt, AttemptOutcome::Success, None);
                tracing::info!(
                    target: "retry",
                    component = ctx.component,
                    source = ctx.source,
                    url = ctx.url,
                    attempt,
                    max_attempts,
                    outcome = "success",
                    "fetch attempt succeeded"
                );
                return (Ok(value), attempts);
            }
            Err(err) => {
                let transient = err.is_transient();
                let outcome = if transient {
                    AttemptOutcome::TransientFailure
                } else {
                    AttemptOutcome::PermanentFailure
                };
                record(&mut attempts, ctx, attempt, outcome, Some(err.to_string()));

                let next = policy.next(
                    attempt,
                    if transient {
                        Outcome::Transient
                    } else {
                        Outcome::Permanent
                    },
                );
                match next {
                    RetryState::RetryWait { delay, .. } => {
                        tracing::warn!(
                            target: "retry",
                            component = ctx.component,
                            source = ctx.source,
                            url = ctx.url,
                            attempt,
                            max_attempts,
                            outcome = outcome.as_str(),
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "fetch attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryState::Exhausted { attempts: n } => {
                        tracing::warn!(
                            target: "retry",
                            component = ctx.component,
                            source = ctx.source,
                            url = ctx.url,
                            attempt,
                            max_attempts,
                            outcome = outcome.as_str(),
                            error = %err,
                            "fetch attempt failed, retry budget exhausted"
                        );
                        return (
                            Err(RetryError::Exhausted {
                                attempts: n,
                                last: err,
                            }),
                            attempts,
                        );
                    }
                    RetryState::Aborted { attempt } => {
                        tracing::warn!(
                            target: "retry",
                            component = ctx.component,
                            source = ctx.source,
                            url = ctx.url,
                            attempt,
                            max_attempts,
                            outcome = outcome.as_str(),
                            error = %err,
                            "fetch attempt failed permanently, not retrying"
                        );
                        return (Err(RetryError::Aborted { attempt, error: err }), attempts);
                    }
                    RetryState::Attempting { .. } | RetryState::Success { .. } => {
                        unreachable!("a failed attempt never transitions to attempting or success")
                    }
                }
            }
        }
    }
}

fn record(
    attempts: &mut Vec<FetchAttempt>,
    ctx: AttemptContext<'_>,
    attempt: u32,
    outcome: AttemptOutcome,
    error: Option<String>,
) {
    counter!(
        "fetch_attempts_total",
        "component" => ctx.component,
        "outcome" => outcome.as_str()
    )
    .increment(1);
    attempts.push(FetchAttempt {
        url: ctx.url.to_string(),
        attempt,
        outcome,
        error,
    });
}
