//! Fault-tolerance middleware for a civic-engagement API.
//!
//! Protects the API and its outbound dependencies (SMS gateway, mail relay,
//! ML service):
//!
//! - [`resilience`]: per-dependency circuit breakers, bounded retries with
//!   jittered backoff, and the registry that reports on them
//! - [`security`]: fixed-window rate limiting over a shared counter store,
//!   degrading to an in-process counter when the store is down
//! - [`http`], [`health`], [`admin`]: the Axum surface exposing all of it
//!
//! ```text
//!     Client ──▶ request id ──▶ rate limiter ──▶ handler ──▶ DependencyGuard ──▶ dependency
//!                                   │                          │
//!                             counter store             breaker + retry
//! ```

// Core subsystems
pub mod clock;
pub mod config;
pub mod http;

// Fault tolerance
pub mod resilience;
pub mod security;

// Cross-cutting concerns
pub mod admin;
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GuardConfig;
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};
