//! Retry executor for remote calls.
//!
//! Every remote operation the coordinator performs (blob put, blob delete, URL
//! signing, listing) goes through [`retry`]. Attempt `k` (k >= 2) waits
//! `base_delay * 2^(k-2)` first. Errors that report themselves as permanent stop
//! the loop immediately; an attempt that exceeds the policy deadline counts as a
//! retryable failure.

use std::future::Future;
use std::time::Duration;

/// Errors the retry executor knows how to classify.
pub trait Retryable: Sized {
    /// Whether another attempt could succeed.
    fn is_retryable(&self) -> bool;

    /// The error to report when an attempt exceeded its deadline.
    fn timed_out(after: Duration) -> Self;
}

#[cfg(feature = "storage")]
impl Retryable for sitevault_storage::StorageError {
    fn is_retryable(&self) -> bool {
        sitevault_storage::StorageError::is_retryable(self)
    }

    fn timed_out(after: Duration) -> Self {
        sitevault_storage::StorageError::Timeout(after)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Deadline for each individual attempt.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Delay before `attempt` (1-based). The first attempt never waits.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if attempt < 2 {
        return Duration::ZERO;
    }
    2u32.checked_pow(attempt - 2)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Run `f` until it succeeds, fails permanently, or runs out of attempts.
///
/// Returns the first success, or the last error seen. `f` is never called
/// more than `policy.max_attempts` times.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        let outcome = match policy.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, f()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(E::timed_out(deadline)),
            },
            None => f().await,
        };

        let error = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            tracing::warn!(
                operation,
                attempt,
                error = %error,
                "Operation failed with a non-retryable error"
            );
            return Err(error);
        }

        if attempt >= max_attempts {
            tracing::warn!(
                operation,
                attempts = attempt,
                error = %error,
                "Operation failed, retry attempts exhausted"
            );
            return Err(error);
        }

        attempt += 1;
        let delay = backoff_delay(policy.base_delay, attempt);
        tracing::warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
