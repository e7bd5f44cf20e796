//! Fixed-window rate limiting middleware.
//!
//! # Responsibilities
//! - Count requests per (policy, key) in the shared counter store
//! - Reject over-budget requests with 429 and standard `RateLimit-*` headers
//! - Fall back to the in-process counter while the shared store is down
//! - Apply skip rules after the handler has produced a status
//!
//! # Design Decisions
//! - The global policy and the most specific route policy both apply
//! - Keys are the peer IP unless the policy keys on identity
//! - Rules are swapped atomically on config reload; in-flight requests keep
//!   the rules they started with

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, OriginalUri, State},
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::clock::SharedClock;
use crate::config::{KeyStrategy, RateLimitConfig, RateLimitPolicyConfig};
use crate::http::request::RequestIdExt;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::timeouts::with_deadline;
use crate::security::store::{CounterHit, CounterStore, MemoryCounterStore, StoreError};

/// Deadline for a store round-trip when no breaker guards the store.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(2);

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Authenticated principal, inserted as a request extension by the
/// embedding service's auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch millis at which the current window ends.
    pub reset_at_ms: u64,
    /// Whole seconds until the window ends, at least 1.
    pub retry_after_secs: u64,
    /// Counted by the local fallback store.
    pub degraded: bool,
}

/// Parsed form of a [`RateLimitPolicyConfig`].
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: String,
    pub path_prefix: Option<String>,
    pub methods: Vec<Method>,
    pub max: u64,
    pub window: Duration,
    pub key: KeyStrategy,
    pub message: String,
    pub skip_successful_requests: bool,
    pub skip_failed_requests: bool,
}

impl RateLimitPolicy {
    pub fn from_config(config: &RateLimitPolicyConfig) -> Self {
        Self {
            name: config.name.clone(),
            path_prefix: config.path_prefix.clone(),
            // Validation rejects unparsable methods before we get here.
            methods: config
                .methods
                .iter()
                .filter_map(|m| m.to_ascii_uppercase().parse().ok())
                .collect(),
            max: config.max,
            window: Duration::from_secs(config.window_secs),
            key: config.key,
            message: config.message.clone(),
            skip_successful_requests: config.skip_successful_requests,
            skip_failed_requests: config.skip_failed_requests,
        }
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        let method_ok = self.methods.is_empty() || self.methods.contains(method);
        let path_ok = match &self.path_prefix {
            None => true,
            Some(prefix) => {
                path == prefix
                    || (path.starts_with(prefix.as_str())
                        && (prefix.ends_with('/') || path[prefix.len()..].starts_with('/')))
            }
        };
        method_ok && path_ok
    }

    /// Whether a response with `status` should be given back to the budget.
    pub fn skips(&self, status: StatusCode) -> bool {
        let failed = status.as_u16() >= 400;
        (self.skip_successful_requests && !failed) || (self.skip_failed_requests && failed)
    }

    fn prefix_len(&self) -> usize {
        self.path_prefix.as_ref().map_or(0, String::len)
    }

    fn store_key(&self, key: &str) -> String {
        format!("rl:{}:{}", self.name, key)
    }
}

/// Shared counter store with local fallback.
#[derive(Debug)]
pub struct CounterBackend {
    store: Arc<dyn CounterStore>,
    local: Arc<MemoryCounterStore>,
    breaker: Option<Arc<CircuitBreaker>>,
    clock: SharedClock,
    degraded: AtomicBool,
}

impl CounterBackend {
    pub fn new(
        store: Arc<dyn CounterStore>,
        local: Arc<MemoryCounterStore>,
        breaker: Option<Arc<CircuitBreaker>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            local,
            breaker,
            clock,
            degraded: AtomicBool::new(false),
        }
    }

    /// Backend that only counts locally.
    pub fn local_only(local: Arc<MemoryCounterStore>, clock: SharedClock) -> Self {
        Self::new(local.clone(), local, None, clock)
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn local(&self) -> &Arc<MemoryCounterStore> {
        &self.local
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Increment `key`, returning the hit and whether the local store served it.
    pub async fn increment(&self, key: &str, window: Duration) -> (CounterHit, bool) {
        let store = self.store.clone();
        let result = match &self.breaker {
            Some(breaker) => breaker
                .execute(|| async move { store.increment(key, window).await })
                .await
                .map_err(|e| e.to_string()),
            None => match with_deadline(STORE_TIMEOUT, store.increment(key, window)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(StoreError::Timeout(STORE_TIMEOUT).to_string()),
            },
        };

        match result {
            Ok(hit) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!(store = self.store.kind(), "Counter store recovered, leaving degraded mode");
                }
                (hit, false)
            }
            Err(error) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        store = self.store.kind(),
                        error = %error,
                        "Counter store unavailable, rate limiting from local memory"
                    );
                }
                (self.local.hit(key, window), true)
            }
        }
    }

    /// Give back one hit to whichever store counted it.
    pub async fn decrement(&self, key: &str, degraded: bool) {
        if degraded {
            self.local.give_back(key);
            return;
        }
        match with_deadline(STORE_TIMEOUT, self.store.decrement(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(key = %key, error = %e, "Failed to give back rate limit hit"),
            Err(e) => tracing::debug!(key = %key, error = %e, "Failed to give back rate limit hit"),
        }
    }
}

/// One policy bound to the counter backend.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    backend: Arc<CounterBackend>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, backend: Arc<CounterBackend>) -> Self {
        Self { policy, backend }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one request for `key` and decide whether it may proceed.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let store_key = self.policy.store_key(key);
        let (hit, degraded) = self.backend.increment(&store_key, self.policy.window).await;
        if degraded {
            metrics::record_rate_limit_degraded(&self.policy.name);
        }

        let ttl_ms = hit.ttl_remaining.as_millis() as u64;
        RateLimitDecision {
            allowed: hit.count <= self.policy.max,
            limit: self.policy.max,
            remaining: self.policy.max.saturating_sub(hit.count),
            reset_at_ms: self.backend.now_ms().saturating_add(ttl_ms),
            retry_after_secs: ttl_ms.div_ceil(1000).max(1),
            degraded,
        }
    }

    /// Give back the hit counted by an earlier [`check`](Self::check).
    pub async fn undo(&self, key: &str, decision: &RateLimitDecision) {
        self.backend.decrement(&self.policy.store_key(key), decision.degraded).await;
    }
}

/// The active set of limiters.
#[derive(Debug)]
pub struct RateLimitRules {
    enabled: bool,
    global: Option<Arc<RateLimiter>>,
    routes: Vec<Arc<RateLimiter>>,
}

impl RateLimitRules {
    pub fn from_config(config: &RateLimitConfig, backend: &Arc<CounterBackend>) -> Self {
        let limiter = |c: &RateLimitPolicyConfig| Arc::new(RateLimiter::new(RateLimitPolicy::from_config(c), backend.clone()));
        Self {
            enabled: config.enabled,
            global: config.global.as_ref().map(limiter),
            routes: config.policies.iter().map(limiter).collect(),
        }
    }

    /// Limiters applying to a request: global first, then the route policy
    /// with the longest matching prefix.
    pub fn select(&self, method: &Method, path: &str) -> Vec<Arc<RateLimiter>> {
        if !self.enabled {
            return Vec::new();
        }
        let mut selected: Vec<_> = self.global.iter().cloned().collect();
        let route = self
            .routes
            .iter()
            .filter(|limiter| limiter.policy.matches(method, path))
            .max_by_key(|limiter| limiter.policy.prefix_len());
        if let Some(route) = route {
            selected.push(route.clone());
        }
        selected
    }
}

/// Middleware state: hot-swappable rules over a fixed backend.
#[derive(Debug)]
pub struct RateLimitState {
    rules: ArcSwap<RateLimitRules>,
    backend: Arc<CounterBackend>,
}

impl RateLimitState {
    pub fn new(config: &RateLimitConfig, backend: Arc<CounterBackend>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(RateLimitRules::from_config(config, &backend)),
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<CounterBackend> {
        &self.backend
    }

    pub fn rules(&self) -> Arc<RateLimitRules> {
        self.rules.load_full()
    }

    /// Swap in rules from a new config. Existing counters are kept.
    pub fn reload(&self, config: &RateLimitConfig) {
        self.rules
            .store(Arc::new(RateLimitRules::from_config(config, &self.backend)));
        tracing::info!(
            enabled = config.enabled,
            policies = config.policies.len(),
            "Rate limit rules reloaded"
        );
    }
}

/// Middleware function for fixed-window rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    // Nested routers strip their prefix from `uri()`.
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let limiters = state.rules().select(&method, &path);
    if limiters.is_empty() {
        return next.run(request).await;
    }

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let identity = request.extensions().get::<Identity>().map(|id| id.0.clone());
    let request_id = request.request_id().unwrap_or("unknown").to_string();

    let mut counted = Vec::with_capacity(limiters.len());
    for limiter in limiters {
        let key = match (limiter.policy.key, &identity) {
            (KeyStrategy::Identity, Some(id)) => format!("user:{id}"),
            _ => ip.clone(),
        };
        let decision = limiter.check(&key).await;

        if !decision.allowed {
            tracing::warn!(
                request_id = %request_id,
                client = %key,
                policy = %limiter.policy.name,
                path = %path,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(&limiter.policy.name);
            metrics::record_request(method.as_str(), StatusCode::TOO_MANY_REQUESTS.as_u16(), start);
            return too_many_requests(&limiter.policy, &decision);
        }
        counted.push((limiter, key, decision));
    }

    let mut response = next.run(request).await;
    let status = response.status();
    metrics::record_request(method.as_str(), status.as_u16(), start);

    for (limiter, key, decision) in &counted {
        if limiter.policy.skips(status) {
            limiter.undo(key, decision).await;
        }
    }

    // Report the tightest budget.
    if let Some((_, _, decision)) = counted.iter().min_by_key(|(_, _, d)| d.remaining) {
        set_rate_limit_headers(&mut response, decision);
    }
    response
}

fn too_many_requests(policy: &RateLimitPolicy, decision: &RateLimitDecision) -> Response {
    let body = json!({
        "success": false,
        "message": policy.message,
        "retryAfter": decision.retry_after_secs,
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    set_rate_limit_headers(&mut response, decision);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
    response
}

fn set_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(decision.retry_after_secs));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use axum::{
        middleware,
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    const START: u64 = 1_700_000_000_000;

    #[derive(Debug)]
    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<CounterHit, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn decrement(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn kind(&self) -> &'static str {
            "down"
        }
    }

    fn local_backend() -> (Arc<CounterBackend>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let local = Arc::new(MemoryCounterStore::new(clock.clone()));
        (Arc::new(CounterBackend::local_only(local, clock.clone())), clock)
    }

    fn limiter(backend: Arc<CounterBackend>) -> RateLimiter {
        RateLimiter::new(
            RateLimitPolicy::from_config(&RateLimitPolicyConfig::new("test", 5, 60)),
            backend,
        )
    }

    #[tokio::test]
    async fn test_sixth_request_rejected_until_window_expires() {
        let (backend, clock) = local_backend();
        let limiter = limiter(backend);

        for expected_remaining in (0..5).rev() {
            let decision = limiter.check("1.2.3.4").await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        clock.advance(Duration::from_millis(500));
        let rejected = limiter.check("1.2.3.4").await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after_secs, 60);
        assert_eq!(rejected.reset_at_ms, START + 60_000);

        clock.advance(Duration::from_millis(59_500));
        let fresh = limiter.check("1.2.3.4").await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 4);
        assert_eq!(fresh.reset_at_ms, START + 120_000);
    }

    #[tokio::test]
    async fn test_keys_have_separate_budgets() {
        let (backend, _) = local_backend();
        let limiter = limiter(backend);
        for _ in 0..5 {
            limiter.check("user:alice").await;
        }
        assert!(!limiter.check("user:alice").await.allowed);
        assert!(limiter.check("user:bob").await.allowed);
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_local_counter() {
        let clock = Arc::new(ManualClock::new(START));
        let local = Arc::new(MemoryCounterStore::new(clock.clone()));
        let backend = Arc::new(CounterBackend::new(Arc::new(DownStore), local.clone(), None, clock));
        let limiter = limiter(backend.clone());

        for _ in 0..5 {
            let decision = limiter.check("1.2.3.4").await;
            assert!(decision.allowed);
            assert!(decision.degraded);
        }
        assert!(!limiter.check("1.2.3.4").await.allowed);
        assert!(backend.is_degraded());
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn test_select_global_plus_longest_prefix() {
        let (backend, _) = local_backend();
        let rules = RateLimitRules::from_config(&RateLimitConfig::default(), &backend);

        let names = |method: Method, path: &str| -> Vec<String> {
            rules.select(&method, path).iter().map(|l| l.policy().name.clone()).collect()
        };

        assert_eq!(names(Method::POST, "/api/auth/otp/send"), vec!["global", "otp"]);
        assert_eq!(names(Method::POST, "/api/auth/login"), vec!["global", "auth"]);
        assert_eq!(names(Method::GET, "/api/reports"), vec!["global", "read"]);
        assert_eq!(names(Method::DELETE, "/api/reports/7"), vec!["global", "write"]);
        assert_eq!(names(Method::GET, "/api/authors"), vec!["global", "read"]);
    }

    #[test]
    fn test_skip_predicates() {
        let mut policy = RateLimitPolicy::from_config(&RateLimitPolicyConfig::new("p", 1, 1));
        assert!(!policy.skips(StatusCode::OK));

        policy.skip_successful_requests = true;
        assert!(policy.skips(StatusCode::CREATED));
        assert!(policy.skips(StatusCode::FOUND));
        assert!(!policy.skips(StatusCode::UNAUTHORIZED));

        policy.skip_successful_requests = false;
        policy.skip_failed_requests = true;
        assert!(policy.skips(StatusCode::BAD_REQUEST));
        assert!(policy.skips(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!policy.skips(StatusCode::OK));
    }

    fn app(config: RateLimitConfig) -> Router {
        let (backend, _) = local_backend();
        let state = Arc::new(RateLimitState::new(&config, backend));
        Router::new()
            .route(
                "/api/auth/login",
                post(|body: String| async move {
                    if body == "correct" {
                        StatusCode::OK
                    } else {
                        StatusCode::UNAUTHORIZED
                    }
                }),
            )
            .route("/api/reports", get(|| async { "reports" }))
            .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
    }

    fn login(password: &str) -> Request<Body> {
        Request::post("/api/auth/login").body(Body::from(password.to_string())).unwrap()
    }

    fn auth_only() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            global: None,
            policies: vec![RateLimitPolicyConfig {
                path_prefix: Some("/api/auth".into()),
                skip_successful_requests: true,
                message: "Too many authentication attempts.".into(),
                ..RateLimitPolicyConfig::new("auth", 5, 900)
            }],
        }
    }

    #[tokio::test]
    async fn test_successful_logins_are_not_counted() {
        let app = app(auth_only());

        for _ in 0..10 {
            let res = app.clone().oneshot(login("correct")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(res.headers()["ratelimit-remaining"], "4");
        }
    }

    #[tokio::test]
    async fn test_failed_logins_exhaust_budget() {
        let app = app(auth_only());

        for _ in 0..5 {
            let res = app.clone().oneshot(login("wrong")).await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }

        let res = app.clone().oneshot(login("correct")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()["ratelimit-limit"], "5");
        assert_eq!(res.headers()["ratelimit-remaining"], "0");
        assert_eq!(res.headers()[header::RETRY_AFTER], "900");

        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({ "success": false, "message": "Too many authentication attempts.", "retryAfter": 900 })
        );
    }

    #[tokio::test]
    async fn test_identity_keys_separate_principals() {
        let app = app(RateLimitConfig {
            enabled: true,
            global: Some(RateLimitPolicyConfig {
                key: KeyStrategy::Identity,
                ..RateLimitPolicyConfig::new("global", 2, 60)
            }),
            policies: Vec::new(),
        });
        let reports = |user: &str| {
            let mut request = Request::get("/api/reports").body(Body::empty()).unwrap();
            request.extensions_mut().insert(Identity(user.to_string()));
            request
        };

        for _ in 0..2 {
            let res = app.clone().oneshot(reports("alice")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = app.clone().oneshot(reports("alice")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        let res = app.clone().oneshot(reports("bob")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_disabled_rules_pass_through() {
        let app = app(RateLimitConfig {
            enabled: false,
            ..auth_only()
        });
        for _ in 0..10 {
            let res = app.clone().oneshot(login("wrong")).await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
            assert!(res.headers().get("ratelimit-limit").is_none());
        }
    }

    #[test]
    fn test_reload_swaps_rules() {
        let (backend, _) = local_backend();
        let state = RateLimitState::new(&auth_only(), backend);
        assert_eq!(state.rules().select(&Method::GET, "/api/reports").len(), 0);

        state.reload(&RateLimitConfig::default());
        assert_eq!(state.rules().select(&Method::GET, "/api/reports").len(), 2);
    }
}
