//! Retry logic.
//!
//! # Responsibilities
//! - Re-invoke a unit of work on failures the caller classifies as retryable
//! - Space attempts with exponential backoff + jitter
//! - Bound the number of attempts
//!
//! # Design Decisions
//! - Classification is supplied per dependency, never hard-coded here
//! - Jittered backoff prevents synchronized retry storms
//! - Non-retryable errors propagate immediately, without delay

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryProfileConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Upper bound for a single backoff delay.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Upper bound of the random jitter added to each delay.
pub const MAX_JITTER: Duration = Duration::from_secs(1);

/// State handed to the `on_retry` hook before each backoff.
#[derive(Debug)]
pub struct RetryContext<'a, E> {
    /// Retry number about to happen (1 for the first retry).
    pub attempt: u32,
    /// The failure that triggered this retry.
    pub last_error: &'a E,
    /// How long the policy will wait before the retry.
    pub next_delay: Duration,
}

/// Bounded exponential-backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    name: String,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            name: "default".to_string(),
            max_retries,
            base_delay,
            max_delay: MAX_DELAY,
            jitter: MAX_JITTER,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &RetryProfileConfig) -> Self {
        Self {
            name: config.name.clone(),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff before the retry following 0-indexed `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.jitter, self.max_delay)
    }

    /// Run `f`, retrying failures for which `should_retry` returns true.
    pub async fn execute<T, E, F, Fut, P>(&self, f: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        self.execute_with(f, should_retry, |_| {}).await
    }

    /// Like [`execute`](Self::execute), calling `on_retry` before every backoff.
    pub async fn execute_with<T, E, F, Fut, P, R>(&self, mut f: F, should_retry: P, mut on_retry: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        R: FnMut(&RetryContext<'_, E>),
        E: Display,
    {
        let mut attempt: u32 = 0;
        loop {
            let error = match f().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !should_retry(&error) {
                tracing::debug!(policy = %self.name, attempt, error = %error, "Error is not retryable");
                return Err(error);
            }

            if attempt >= self.max_retries {
                tracing::error!(
                    policy = %self.name,
                    max_retries = self.max_retries,
                    error = %error,
                    "All retries exhausted"
                );
                return Err(error);
            }

            let delay = self.delay_for(attempt);
            attempt += 1;

            tracing::warn!(
                policy = %self.name,
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after error"
            );
            metrics::record_retry(&self.name);

            on_retry(&RetryContext {
                attempt,
                last_error: &error,
                next_delay: delay,
            });

            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}
