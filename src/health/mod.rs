//! Health reporting subsystem.
//!
//! # Endpoints
//! ```text
//! GET /health/live   → process is up (always 200)
//! GET /health/ready  → counter store answers ping (503 otherwise)
//! GET /health        → store + breaker detail, UP or WARNING
//! ```
//!
//! # Design Decisions
//! - Liveness never touches dependencies
//! - An open breaker is a warning, not a readiness failure: the service
//!   still answers, with fallbacks

pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::resilience::registry::BreakerRegistry;
use crate::security::store::CounterStore;

/// State shared by the health handlers.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub registry: Arc<BreakerRegistry>,
    pub store: Arc<dyn CounterStore>,
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(handlers::detailed))
        .route("/health/live", get(handlers::live))
        .route("/health/ready", get(handlers::ready))
        .with_state(state)
}
