//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the breaker registry from configuration
//! - Wire the counter store, its breaker and the local fallback
//! - Hand out per-dependency guards to business code
//! - Apply reloaded configuration to the live services, admin key included
//!
//! # Design Decisions
//! - Configuration arrives already validated by the loader
//! - Breakers survive reloads with their state; new names are added, none removed
//! - Services are built once and shared by `Arc`, never global

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::clock::{self, SharedClock};
use crate::config::{GuardConfig, RetryConfig};
use crate::resilience::guard::DependencyGuard;
use crate::resilience::registry::BreakerRegistry;
use crate::resilience::retries::RetryPolicy;
use crate::security::rate_limit::{CounterBackend, RateLimitState};
use crate::security::store::{CounterStore, MemoryCounterStore};

/// Breaker name guarding the shared counter store.
pub const COUNTER_STORE_BREAKER: &str = "counter_store";

/// Long-lived services shared by the HTTP layer and business code.
#[derive(Debug)]
pub struct Services {
    pub clock: SharedClock,
    pub registry: Arc<BreakerRegistry>,
    pub rate_limits: Arc<RateLimitState>,
    retries: ArcSwap<RetryConfig>,
    admin_key: Arc<ArcSwap<String>>,
}

impl Services {
    /// Services backed by the in-process counter store alone.
    pub fn new(config: &GuardConfig) -> Self {
        let clock = clock::system();
        let local = Arc::new(MemoryCounterStore::new(clock.clone()));
        Self::build(config, local.clone(), local, clock)
    }

    /// Services using `store` as the shared counter store.
    pub fn with_store(config: &GuardConfig, store: Arc<dyn CounterStore>, clock: SharedClock) -> Self {
        let local = Arc::new(MemoryCounterStore::new(clock.clone()));
        Self::build(config, store, local, clock)
    }

    fn build(
        config: &GuardConfig,
        store: Arc<dyn CounterStore>,
        local: Arc<MemoryCounterStore>,
        clock: SharedClock,
    ) -> Self {
        let registry = Arc::new(BreakerRegistry::from_configs(&config.breakers, clock.clone()));
        let backend = Arc::new(CounterBackend::new(
            store,
            local,
            registry.get(COUNTER_STORE_BREAKER),
            clock.clone(),
        ));

        tracing::info!(
            breakers = registry.len(),
            store = backend.store().kind(),
            rate_limiting = config.rate_limit.enabled,
            "Services initialized"
        );

        Self {
            clock,
            registry,
            rate_limits: Arc::new(RateLimitState::new(&config.rate_limit, backend)),
            retries: ArcSwap::from_pointee(config.retries.clone()),
            admin_key: Arc::new(ArcSwap::from_pointee(config.admin.api_key.clone())),
        }
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        self.rate_limits.backend().store()
    }

    pub fn local_store(&self) -> &Arc<MemoryCounterStore> {
        self.rate_limits.backend().local()
    }

    /// Admin API key, shared with the admin router.
    pub fn admin_key(&self) -> &Arc<ArcSwap<String>> {
        &self.admin_key
    }

    /// Breaker + retry profile for dependency `name`. Falls back to the
    /// default retry policy when no profile shares the breaker's name.
    pub fn guard(&self, name: &str) -> Option<DependencyGuard> {
        let breaker = self.registry.get(name)?;
        let retry = match self.retries.load().profile(name) {
            Some(profile) => RetryPolicy::from_config(profile),
            None => RetryPolicy::default().named(name),
        };
        Some(DependencyGuard::new(breaker, retry))
    }

    /// Apply a reloaded configuration.
    pub fn apply(&self, config: &GuardConfig) {
        for breaker in &config.breakers {
            self.registry.register(breaker);
        }
        self.retries.store(Arc::new(config.retries.clone()));
        self.rate_limits.reload(&config.rate_limit);
        self.admin_key.store(Arc::new(config.admin.api_key.clone()));
    }
}
