//! Breaker + retry composition for one outbound dependency.
//!
//! # Responsibilities
//! - Pair a registered breaker with a retry profile
//! - Retry only transient failures, as classified by the error itself
//!
//! # Design Decisions
//! - The breaker wraps the whole retry sequence and sees one outcome per
//!   logical call
//! - The breaker's call timeout bounds each attempt, not the sequence, so
//!   backoff never eats into the last attempts
//! - An open circuit is never retried

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::error::{BreakerError, Classify};
use crate::resilience::retries::RetryPolicy;

#[derive(Debug, Clone)]
pub struct DependencyGuard {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl DependencyGuard {
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self { breaker, retry }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Invoke `f` with retries of transient errors, through the breaker.
    pub async fn call<T, E, F, Fut>(&self, mut f: F) -> Result<T, BreakerError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let (breaker, retry) = (&self.breaker, &self.retry);
        self.breaker
            .guarded(
                move || retry.execute(move || breaker.attempt(f()), |e: &BreakerError<E>| e.is_transient()),
                None::<fn() -> std::future::Ready<Result<T, E>>>,
            )
            .await
    }

    /// Like [`call`](Self::call), answering with `fallback` when the circuit
    /// is open or the retried call still fails.
    pub async fn call_with_fallback<T, E, F, Fut, G, GFut>(&self, mut f: F, fallback: G) -> Result<T, BreakerError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let (breaker, retry) = (&self.breaker, &self.retry);
        self.breaker
            .guarded(
                move || retry.execute(move || breaker.attempt(f()), |e: &BreakerError<E>| e.is_transient()),
                Some(fallback),
            )
            .await
    }
}
