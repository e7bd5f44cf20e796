//! Named breaker registry.
//!
//! # Responsibilities
//! - Own one breaker per named dependency
//! - Report per-breaker snapshots and aggregate health
//! - Administrative reset, individually or all at once
//!
//! # Design Decisions
//! - Registration is idempotent: a name registered twice keeps the first
//!   breaker so callers holding it never diverge from health reporting
//! - Lookups return `Arc` clones; no lock is held while a call runs

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::BreakerConfig;
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};

/// Aggregate health derived from breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Up,
    /// At least one breaker is Open.
    Warning,
}

#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    clock: SharedClock,
}

impl BreakerRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            breakers: DashMap::new(),
            clock,
        }
    }

    pub fn from_configs(configs: &[BreakerConfig], clock: SharedClock) -> Self {
        let registry = Self::new(clock);
        for config in configs {
            registry.register(config);
        }
        registry
    }

    /// Register a breaker, returning the existing one if the name is taken.
    pub fn register(&self, config: &BreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(config.name.clone())
            .or_insert_with(|| {
                tracing::debug!(
                    breaker = %config.name,
                    failure_threshold = config.failure_threshold,
                    reset_timeout_ms = config.reset_timeout_ms,
                    "Circuit breaker registered"
                );
                Arc::new(CircuitBreaker::new(config, self.clock.clone()))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Snapshots of every breaker, ordered by name.
    pub fn list_states(&self) -> Vec<BreakerSnapshot> {
        let mut states: Vec<_> = self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    pub fn open_breakers(&self) -> Vec<String> {
        let mut open: Vec<_> = self
            .breakers
            .iter()
            .filter(|entry| entry.value().state() == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect();
        open.sort();
        open
    }

    pub fn any_open(&self) -> bool {
        self.breakers
            .iter()
            .any(|entry| entry.value().state() == CircuitState::Open)
    }

    pub fn health(&self) -> HealthStatus {
        if self.any_open() {
            HealthStatus::Warning
        } else {
            HealthStatus::Up
        }
    }

    /// Reset one breaker. Returns false when no breaker has that name.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.iter().map(|entry| entry.value().clone()).collect();
        for breaker in breakers {
            breaker.reset();
        }
        tracing::info!(count = self.len(), "All circuit breakers reset");
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
