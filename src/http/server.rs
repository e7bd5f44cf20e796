//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: health probes, gated `/api`, embedder routes
//! - Wire up middleware (tracing, timeout, body limit, request ID, rate limiting)
//! - Serve the admin API on its own listener
//! - Run background tasks: counter sweeps and config reloads
//! - Drain gracefully on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Request,
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::GuardConfig;
use crate::health::{health_router, HealthState};
use crate::http::request::{RequestIdExt, RequestIdLayer};
use crate::lifecycle::shutdown::wait;
use crate::lifecycle::startup::Services;
use crate::security::rate_limit::rate_limit_middleware;

/// How often expired local rate-limit windows are dropped.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Largest request body accepted on any route.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// HTTP server fronting the guarded API.
pub struct HttpServer {
    config: GuardConfig,
    services: Arc<Services>,
    api: Router,
}

impl HttpServer {
    /// Create a new HTTP server with in-process services.
    pub fn new(config: GuardConfig) -> Self {
        let services = Arc::new(Services::new(&config));
        Self::with_services(config, services)
    }

    pub fn with_services(config: GuardConfig, services: Arc<Services>) -> Self {
        Self {
            config,
            services,
            api: Router::new(),
        }
    }

    /// Mount application routes under `/api`, behind the rate limiter.
    pub fn with_api(mut self, api: Router) -> Self {
        self.api = self.api.merge(api);
        self
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// The public router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/ping", get(ping))
            .merge(self.api.clone())
            .layer(middleware::from_fn_with_state(
                self.services.rate_limits.clone(),
                rate_limit_middleware,
            ));

        let health = health_router(HealthState {
            registry: self.services.registry.clone(),
            store: self.services.store().clone(),
        });

        Router::new()
            .nest("/api", api)
            .merge(health)
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
            .layer(RequestIdLayer)
    }

    pub fn admin_router(&self) -> Router {
        setup_admin_router(AdminState::with_shared_key(
            self.services.registry.clone(),
            self.services.admin_key().clone(),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestIdLayer)
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires. Configs arriving on `config_updates` are applied live.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GuardConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        tokio::spawn(sweep_counters(self.services.clone(), shutdown.resubscribe()));
        tokio::spawn(apply_config_updates(
            self.services.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let admin_addr = admin_listener.local_addr()?;
            let admin = self.admin_router();
            let admin_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                tracing::info!(address = %admin_addr, "Admin API listening");
                if let Err(e) = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(wait(admin_shutdown))
                    .await
                {
                    tracing::error!(error = %e, "Admin server failed");
                }
            });
        }

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Cheap gated endpoint for probing the rate limiter.
async fn ping(request: Request) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "pong",
        "requestId": request.request_id(),
    }))
}

async fn sweep_counters(services: Arc<Services>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = services.local_store().sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = services.local_store().len(), "Swept expired rate limit windows");
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Counter sweeper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

async fn apply_config_updates(
    services: Arc<Services>,
    mut updates: mpsc::UnboundedReceiver<GuardConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => services.apply(&config),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}
