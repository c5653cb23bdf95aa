//! Bounded retry with exponential backoff
//!
//! Wraps a single remote call. Every failure is retried until the policy's attempt
//! budget is spent; the caller decides what to do with an exhausted result.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

/// Longest wait between two attempts, whatever the policy's multiplier
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Retry configuration shared by all callers of one operation kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Factor applied to the delay after every failed attempt
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Listing calls: 3 attempts, waits of 1s then 2s
    pub const LISTING: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        backoff_multiplier: 2.0,
    };

    /// Download calls: 3 attempts, waits of 2s then 4s
    pub const DOWNLOAD: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_secs(2),
        backoff_multiplier: 2.0,
    };

    /// Delays slept between attempts, in order, each capped at [`MAX_RETRY_DELAY`]
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial_delay.min(MAX_RETRY_DELAY)), move |d| {
            Some(next_delay(*d, self.backoff_multiplier))
        })
        .take(self.max_attempts.max(1) as usize - 1)
    }
}

/// Scale `delay` by `multiplier` without overflowing
fn next_delay(delay: Duration, multiplier: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * multiplier)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

/// Errors the retry executor can classify for its logs
pub trait Retryable: Display {
    /// Whether a later attempt has a realistic chance of succeeding.
    ///
    /// Every failure is retried regardless; this is reported alongside each retry.
    fn is_retryable(&self) -> bool;
}

/// Every attempt of an operation failed; `last_error` is the final attempt's error
#[derive(Debug)]
pub struct Exhausted<E> {
    pub operation: &'static str,
    pub attempts: u32,
    pub last_error: E,
}

/// Exhaustion with the last error reduced to its message
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation} failed after {attempts} attempts: {last_error}")]
pub struct RetriesExhausted {
    pub operation: &'static str,
    pub attempts: u32,
    pub last_error: String,
}

impl<E: Display> From<Exhausted<E>> for RetriesExhausted {
    fn from(exhausted: Exhausted<E>) -> Self {
        Self {
            operation: exhausted.operation,
            attempts: exhausted.attempts,
            last_error: exhausted.last_error.to_string(),
        }
    }
}

/// Run `f` until it succeeds or the policy's attempts are spent.
///
/// The wait between attempts is a tokio sleep, so only the calling task is suspended.
pub async fn execute<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut f: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delays = policy.delays();
    let mut attempt = 1;

    loop {
        let e = match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation, attempt = attempt, "Retried operation succeeded");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let Some(delay) = delays.next() else {
            error!(
                operation = operation,
                attempts = attempt,
                error = %e,
                "Remote operation failed, giving up"
            );
            return Err(Exhausted {
                operation,
                attempts: attempt,
                last_error: e,
            });
        };

        warn!(
            operation = operation,
            attempt = attempt,
            max = max_attempts,
            delay_ms = delay.as_millis() as u64,
            retryable = e.is_retryable(),
            error = %e,
            "Retrying remote operation"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
