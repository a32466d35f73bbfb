//! Bounded exponential backoff for transient platform failures.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{ReconcileError, Result, SyncError};

/// Retry policy for one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of any delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, for tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (zero-based): `base * 2^attempt`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Decides whether failed attempt number `attempt` (one-based) is retried
    /// and returns the delay to wait first.
    ///
    /// A rate-limit hint from the platform replaces the computed backoff.
    #[must_use]
    pub fn backoff(&self, attempt: u32, err: &SyncError) -> Option<Duration> {
        if !err.is_retryable() || attempt >= self.max_attempts.max(1) {
            return None;
        }
        let delay = err
            .retry_delay()
            .unwrap_or_else(|| self.delay_for(attempt.saturating_sub(1)));
        Some(delay.min(self.max_delay))
    }

    /// Wraps the last transient error once the attempt budget is spent.
    #[must_use]
    pub fn exhausted(label: &str, attempts: u32, err: &SyncError) -> SyncError {
        ReconcileError::RetriesExhausted {
            operation: label.to_string(),
            attempts,
            last_error: err.to_string(),
        }
        .into()
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error unchanged, or
    /// [`ReconcileError::RetriesExhausted`] once every attempt failed.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    match self.backoff(attempt, &err) {
                        Some(delay) => {
                            warn!("{label} failed ({err}), retry {attempt} in {delay:?}");
                            tokio::time::sleep(delay).await;
                        }
                        None if err.is_retryable() => {
                            return Err(Self::exhausted(label, attempt, &err));
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }
}
