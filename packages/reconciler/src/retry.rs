//! Retry-with-confirmation policy.
//!
//! Wraps a single unit of work with a fixed number of attempts and a
//! fixed inter-attempt delay. Transient failures and explicit
//! not-present answers share the same attempt budget: only exhausting
//! every attempt yields a [`DefinitiveFailure`], which is the sole
//! trigger the liveness tracker accepts for out-of-band deactivation.
//! A single flaky response therefore never deactivates a listing.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::error::AttemptError;

/// The terminal signal after exhausting all attempts.
#[derive(Debug, Error)]
#[error("definitive failure after {attempts} attempts: {last_error}")]
pub struct DefinitiveFailure {
    pub attempts: u32,
    pub last_error: AttemptError,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` is the total number of tries, not the number of
    /// retries. Zero is treated as one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// The inter-attempt delay is inserted between attempts only. This
    /// delay is per-item; the executor's inter-batch delay is a
    /// separate, larger constant.
    pub async fn attempt<T, F, Fut>(&self, mut op: F) -> Result<T, DefinitiveFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "attempt failed"
                    );
                    last_error = Some(err);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        // max_attempts >= 1, so at least one attempt ran and failed.
        Err(DefinitiveFailure {
            attempts: self.max_attempts,
            last_error: last_error.unwrap_or(AttemptError::NotPresent),
        })
    }
}
