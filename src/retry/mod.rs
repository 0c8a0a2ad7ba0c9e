use std::fmt::Display;
use std::future::Future;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::{sleep, Duration};

/// Classification of an error for retry purposes.
///
/// Only transient failures (network, timeout, rate limit, empty result) are
/// retried. Anything structurally wrong is returned immediately.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt with 0-based index `attempt`
    ///
    /// `initial_delay * backoff^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("non-retryable failure: {0}")]
    Permanent(E),
}

/// Runs fallible async operations with bounded retries and exponential backoff
///
/// Backoff sleeps suspend only the calling task.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// # Arguments
    /// * `label` - Name used in log lines (e.g. the data source)
    /// * `operation` - Zero-argument closure producing a fresh future per attempt
    pub async fn execute<T, E, F, Fut>(
        &self,
        label: &str,
        mut operation: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            label,
                            attempts = attempt + 1,
                            "✓ {} succeeded after {} attempts",
                            label,
                            attempt + 1
                        );
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!(label, error = %e, "{} failed with non-retryable error", label);
                    return Err(RetryError::Permanent(e));
                }
                Err(e) => {
                    if attempt + 1 >= max_attempts {
                        tracing::error!(
                            label,
                            attempts = max_attempts,
                            error = %e,
                            "{} failed after {} attempts",
                            label,
                            max_attempts
                        );
                        return Err(RetryError::Exhausted {
                            attempts: max_attempts,
                            last: e,
                        });
                    }

                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        label,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Attempt {}/{} failed for {}. Retrying in {}ms...",
                        attempt + 1,
                        max_attempts,
                        label,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
