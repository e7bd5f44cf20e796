use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::health::HealthState;
use crate::resilience::circuit_breaker::BreakerSnapshot;
use crate::resilience::registry::HealthStatus;
use crate::resilience::timeouts::with_deadline;

const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub kind: &'static str,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealth {
    pub status: HealthStatus,
    pub version: &'static str,
    pub counter_store: StoreHealth,
    pub open_breakers: Vec<String>,
    pub breakers: Vec<BreakerSnapshot>,
}

pub async fn live() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}

pub async fn ready(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let store = check_store(&state).await;
    match store.error {
        None => (StatusCode::OK, Json(json!({ "status": "READY" }))),
        Some(error) => {
            tracing::warn!(store = store.kind, error = %error, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "NOT_READY", "reason": error })),
            )
        }
    }
}

pub async fn detailed(State(state): State<HealthState>) -> Json<DetailedHealth> {
    let counter_store = check_store(&state).await;
    let breakers = state.registry.list_states();
    let open_breakers = state.registry.open_breakers();

    let status = if open_breakers.is_empty() && counter_store.error.is_none() {
        HealthStatus::Up
    } else {
        HealthStatus::Warning
    };

    Json(DetailedHealth {
        status,
        version: env!("CARGO_PKG_VERSION"),
        counter_store,
        open_breakers,
        breakers,
    })
}

async fn check_store(state: &HealthState) -> StoreHealth {
    let error = match with_deadline(PING_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(e.to_string()),
    };
    StoreHealth {
        kind: state.store.kind(),
        status: if error.is_none() { HealthStatus::Up } else { HealthStatus::Warning },
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::BreakerConfig;
    use crate::health::health_router;
    use crate::resilience::registry::BreakerRegistry;
    use crate::security::store::MemoryCounterStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> HealthState {
        let clock = Arc::new(ManualClock::new(0));
        let configs = vec![BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::named("sms")
        }];
        HealthState {
            registry: Arc::new(BreakerRegistry::from_configs(&configs, clock.clone())),
            store: Arc::new(MemoryCounterStore::new(clock)),
        }
    }

    async fn get_json(state: HealthState, path: &str) -> (StatusCode, Value) {
        let res = health_router(state)
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_live_and_ready() {
        assert_eq!(get_json(state(), "/health/live").await, (StatusCode::OK, json!({ "status": "UP" })));
        assert_eq!(get_json(state(), "/health/ready").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_open_breaker_reports_warning() {
        let state = state();
        let (_, body) = get_json(state.clone(), "/health").await;
        assert_eq!(body["status"], "UP");

        let sms = state.registry.get("sms").unwrap();
        let _ = sms.execute(|| async { Err::<(), _>("gateway down") }).await;

        let (status, body) = get_json(state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "WARNING");
        assert_eq!(body["openBreakers"], json!(["sms"]));
        assert_eq!(body["breakers"][0]["state"], "OPEN");
        assert_eq!(body["counterStore"]["kind"], "memory");
    }
}
