//! Exponential backoff retry for activities.
//!
//! Only errors for which [`ActivityError::is_retryable`] holds are retried.
//! Rebase conflicts and other deterministic failures are returned after the
//! first attempt.

use std::future::Future;
use std::time::Duration;

use crate::activities::ActivityError;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap for exponential growth.
    pub max_delay: Duration,

    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Default for activities: 5 retries, 1s doubling, 30s cap.
    pub const DEFAULT: Self = Self {
        max_retries: 5,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    };

    /// A single attempt.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug)]
pub enum RetryResult<T> {
    Success(T),

    /// A retryable error persisted through every attempt.
    ExhaustedRetries {
        last_error: ActivityError,
        attempts: u32,
    },

    /// A non-retryable error ended the attempts.
    PermanentError(ActivityError),
}

impl<T> RetryResult<T> {
    pub fn into_result(self) -> Result<T, ActivityError> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::PermanentError(e) => Err(e),
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of retries.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let mut attempt = 0;
    let max_attempts = config.max_retries + 1;

    loop {
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => {
                attempt += 1;

                if !e.is_retryable() {
                    return RetryResult::PermanentError(e);
                }
                if attempt >= max_attempts {
                    return RetryResult::ExhaustedRetries {
                        last_error: e,
                        attempts: attempt,
                    };
                }

                let delay = config.delay_for_attempt(attempt - 1);
                tracing::debug!(attempt, ?delay, error = %e, "Retrying activity");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
