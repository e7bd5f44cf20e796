//! Administrative API for breaker inspection and recovery.
//!
//! # Routes
//! ```text
//! GET  /admin/status                → version, uptime, aggregate health
//! GET  /admin/breakers              → every breaker snapshot
//! POST /admin/breakers/reset        → reset every breaker
//! POST /admin/breakers/{name}/reset → reset one breaker
//! ```
//!
//! All routes require `Authorization: Bearer <api_key>`. The key is swapped
//! in place on config reload.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::resilience::registry::BreakerRegistry;
use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Debug, Clone)]
pub struct AdminState {
    pub registry: Arc<BreakerRegistry>,
    pub api_key: Arc<ArcSwap<String>>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(registry: Arc<BreakerRegistry>, api_key: &str) -> Self {
        Self::with_shared_key(registry, Arc::new(ArcSwap::from_pointee(api_key.to_string())))
    }

    /// Admin state reading its key from `api_key` on every request.
    pub fn with_shared_key(registry: Arc<BreakerRegistry>, api_key: Arc<ArcSwap<String>>) -> Self {
        Self {
            registry,
            api_key,
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/reset", post(reset_all_breakers))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
