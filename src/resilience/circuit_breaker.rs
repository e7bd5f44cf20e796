//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: probing whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: first call at or after next_attempt_at
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency, owned by the registry
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in flight while Half-Open (prevents hammering a recovering dependency)
//! - State lives behind a mutex that is never held across an await
//! - Outcomes that land while Open (calls admitted before the trip) are ignored

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::error::BreakerError;
use crate::resilience::timeouts::with_deadline;

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker, for health and admin reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
    pub reset_timeout_ms: u64,
    /// Epoch millis of the next allowed probe; only set while Open.
    pub next_attempt_at: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: u64,
    probe_in_flight: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt_at: 0,
            probe_in_flight: false,
        }
    }
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
    Rejected,
}

/// Per-dependency circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    call_timeout: Duration,
    reset_timeout: Duration,
    clock: SharedClock,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig, clock: SharedClock) -> Self {
        metrics::record_breaker_state(&config.name, CircuitState::Closed);
        Self {
            name: config.name.clone(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            call_timeout: Duration::from_millis(config.timeout_ms),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            clock,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout_ms: self.call_timeout.as_millis() as u64,
            reset_timeout_ms: self.reset_timeout.as_millis() as u64,
            next_attempt_at: (inner.state == CircuitState::Open).then_some(inner.next_attempt_at),
        }
    }

    /// Force Closed with zeroed counters. Administrative use only.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        *inner = BreakerState::closed();
        drop(inner);

        if from != CircuitState::Closed {
            metrics::record_breaker_transition(&self.name, from, CircuitState::Closed);
        }
        tracing::info!(breaker = %self.name, from = %from, "Circuit breaker manually reset");
    }

    /// Run `f` through the breaker.
    pub async fn execute<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guarded(move || self.attempt(f()), None::<fn() -> std::future::Ready<Result<T, E>>>)
            .await
    }

    /// Run `f` through the breaker, answering with `fallback` when the
    /// circuit is open or the call fails. Fallback errors are returned as-is.
    pub async fn execute_with_fallback<T, E, F, Fut, G, GFut>(&self, f: F, fallback: G) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        self.guarded(move || self.attempt(f()), Some(fallback)).await
    }

    /// Bound a single call by the call timeout. Breaker state is untouched.
    pub async fn attempt<T, E, Fut>(&self, fut: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match with_deadline(self.call_timeout, fut).await {
            Ok(result) => result.map_err(BreakerError::Inner),
            Err(_) => {
                tracing::warn!(
                    breaker = %self.name,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "Call timed out"
                );
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    after: self.call_timeout,
                })
            }
        }
    }

    /// Admission and outcome bookkeeping around `f`, which applies its own
    /// deadlines.
    pub(crate) async fn guarded<T, E, F, Fut, G, GFut>(&self, f: F, fallback: Option<G>) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BreakerError<E>>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit();
        if admission == Admission::Rejected {
            metrics::record_breaker_rejection(&self.name);
            return match fallback {
                Some(fallback) => fallback().await.map_err(BreakerError::Inner),
                None => Err(BreakerError::Open {
                    name: self.name.clone(),
                }),
            };
        }

        let mut probe = ProbeSlot {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let error = match f().await {
            Ok(value) => {
                probe.armed = false;
                self.on_success(admission);
                return Ok(value);
            }
            Err(e) => e,
        };
        probe.armed = false;
        self.on_failure(admission);

        match fallback {
            Some(fallback) => {
                tracing::info!(breaker = %self.name, "Circuit breaker using fallback");
                fallback().await.map_err(BreakerError::Inner)
            }
            None => Err(error),
        }
    }

    fn admit(&self) -> Admission {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open if now < inner.next_attempt_at => {
                tracing::debug!(
                    breaker = %self.name,
                    next_attempt_at = inner.next_attempt_at,
                    "Circuit breaker OPEN - rejecting request"
                );
                Admission::Rejected
            }
            CircuitState::Open => {
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.probe_in_flight = true;
                drop(inner);
                metrics::record_breaker_transition(&self.name, CircuitState::Open, CircuitState::HalfOpen);
                tracing::info!(breaker = %self.name, "Circuit breaker entering HALF_OPEN state");
                Admission::Probe
            }
            CircuitState::HalfOpen if inner.probe_in_flight => {
                tracing::debug!(breaker = %self.name, "Probe in flight - rejecting request");
                Admission::Rejected
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                Admission::Probe
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match (inner.state, admission) {
            (CircuitState::Closed, _) => inner.failure_count = 0,
            (CircuitState::HalfOpen, Admission::Probe) => {
                inner.probe_in_flight = false;
                inner.failure_count = 0;
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    *inner = BreakerState::closed();
                    drop(inner);
                    metrics::record_breaker_transition(&self.name, CircuitState::HalfOpen, CircuitState::Closed);
                    tracing::info!(breaker = %self.name, "Circuit breaker CLOSED - service recovered");
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission) {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    self.trip(inner, CircuitState::Closed, now);
                }
            }
            (CircuitState::HalfOpen, Admission::Probe) => {
                inner.probe_in_flight = false;
                inner.failure_count += 1;
                self.trip(inner, CircuitState::HalfOpen, now);
            }
            _ => {}
        }
    }

    fn trip(&self, mut inner: MutexGuard<'_, BreakerState>, from: CircuitState, now: u64) {
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.next_attempt_at = now.saturating_add(self.reset_timeout.as_millis() as u64);
        let (failure_count, next_attempt_at) = (inner.failure_count, inner.next_attempt_at);
        drop(inner);

        metrics::record_breaker_transition(&self.name, from, CircuitState::Open);
        tracing::error!(
            breaker = %self.name,
            from = %from,
            failure_count,
            next_attempt_at,
            "Circuit breaker OPEN - too many failures"
        );
    }

    fn release_probe(&self) {
        self.lock().probe_in_flight = false;
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State is plain counters; a panic elsewhere cannot leave it half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Frees the Half-Open probe slot if the probing call is dropped mid-flight.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe();
        }
    }
}
