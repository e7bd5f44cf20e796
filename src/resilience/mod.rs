//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call to a dependency (SMS, email, ML):
//!     → guard.rs (pick breaker + retry profile for the dependency)
//!     → circuit_breaker.rs (fail fast if OPEN, else race call vs timeouts.rs)
//!     → retries.rs (retry transient errors, backoff.rs spacing)
//!     → error.rs (classify transient vs fatal)
//! ```
//!
//! # Design Decisions
//! - Every outbound call has a deadline
//! - Retries only for errors classified as transient
//! - Breakers are registered once at startup in registry.rs and shared by `Arc`
//! - Fallbacks are opt-in per call site

pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod guard;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use error::{BreakerError, Classify, DependencyError, ErrorClass};
pub use guard::DependencyGuard;
pub use registry::{BreakerRegistry, HealthStatus};
pub use retries::{RetryContext, RetryPolicy};
