use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::admin::AdminState;
use crate::resilience::circuit_breaker::BreakerSnapshot;
use crate::resilience::registry::HealthStatus;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub breakers: usize,
    pub open_breakers: Vec<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: state.registry.health(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        breakers: state.registry.len(),
        open_breakers: state.registry.open_breakers(),
    })
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.registry.list_states())
}

pub async fn reset_breaker(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<BreakerSnapshot>, (StatusCode, Json<Value>)> {
    match state.registry.get(&name) {
        Some(breaker) => {
            breaker.reset();
            Ok(Json(breaker.snapshot()))
        }
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "message": format!("Unknown circuit breaker: {name}") })),
        )),
    }
}

pub async fn reset_all_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    state.registry.reset_all();
    Json(state.registry.list_states())
}

#[cfg(test)]
mod tests {
    use crate::admin::{setup_admin_router, AdminState};
    use crate::clock::ManualClock;
    use crate::config::BreakerConfig;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::registry::BreakerRegistry;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AdminState {
        let configs = vec![
            BreakerConfig {
                failure_threshold: 1,
                ..BreakerConfig::named("sms")
            },
            BreakerConfig::named("email"),
        ];
        let registry = BreakerRegistry::from_configs(&configs, Arc::new(ManualClock::new(0)));
        AdminState::new(Arc::new(registry), "admin-secret-key")
    }

    fn request(method: &str, path: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let app = setup_admin_router(state());

        let res = app.clone().oneshot(request("GET", "/admin/status", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app.clone().oneshot(request("GET", "/admin/status", Some("wrong"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app.oneshot(request("GET", "/admin/status", Some("admin-secret-key"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_swapped_key_takes_effect_immediately() {
        let state = state();
        let key = state.api_key.clone();
        let app = setup_admin_router(state);

        key.store(Arc::new("rotated-key".to_string()));

        let res = app
            .clone()
            .oneshot(request("GET", "/admin/status", Some("admin-secret-key")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app.oneshot(request("GET", "/admin/status", Some("rotated-key"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reset_single_and_unknown_breaker() {
        let state = state();
        let sms = state.registry.get("sms").unwrap();
        let _ = sms.execute(|| async { Err::<(), _>("down") }).await;
        assert_eq!(sms.state(), CircuitState::Open);

        let app = setup_admin_router(state);
        let res = app
            .clone()
            .oneshot(request("POST", "/admin/breakers/sms/reset", Some("admin-secret-key")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(sms.state(), CircuitState::Closed);

        let res = app
            .oneshot(request("POST", "/admin/breakers/nonexistent/reset", Some("admin-secret-key")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_breakers() {
        let app = setup_admin_router(state());
        let res = app
            .oneshot(request("GET", "/admin/breakers", Some("admin-secret-key")))
            .await
            .unwrap();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(body[0]["name"], "email");
        assert_eq!(body[1]["name"], "sms");
        assert_eq!(body[1]["failureThreshold"], 1);
    }
}
