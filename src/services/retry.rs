//! Bounded exponential-backoff retry policy.
//!
//! Used by the container install step (3 attempts, 2s/4s sleeps) and the
//! direct-API client. Backoff doubles per attempt and is capped; no sleep
//! after the final attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::domain::ports::errors::OrchestratorError;

/// Retry policy with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles afterwards.
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Outcome of [`RetryPolicy::run`], carrying the attempt count either way.
#[derive(Debug)]
pub struct RetryReport<T> {
    pub result: Result<T, OrchestratorError>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            ..Self::default()
        }
    }

    /// The container-install schedule: 3 attempts, sleeps of 2s then 4s.
    pub fn install() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    /// Run `operation` until it succeeds or attempts are exhausted.
    ///
    /// Every error is considered retryable here; callers that need to stop
    /// early on permanent errors should use [`RetryPolicy::run_if`].
    pub async fn run<F, Fut, T>(&self, operation: F) -> RetryReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        self.run_if(operation, |_| true).await
    }

    /// Run `operation`, retrying only while `should_retry` approves the
    /// error and attempts remain.
    pub async fn run_if<F, Fut, T, P>(&self, mut operation: F, should_retry: P) -> RetryReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
        P: Fn(&OrchestratorError) -> bool,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    return RetryReport {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) => {
                    if attempt >= self.max_attempts || !should_retry(&err) {
                        return RetryReport {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }

                    let backoff = self.backoff_for(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying after backoff"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    /// Backoff for a 0-indexed attempt: `initial * 2^attempt`, capped.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let millis = (self.initial_backoff.as_millis() as u64)
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff.as_millis() as u64);
        Duration::from_millis(millis)
    }
}
