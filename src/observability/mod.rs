//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, retry policies and rate limiters produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every breaker transition is logged and counted
//! - Request ID (x-request-id) is attached to rate-limit rejections
//! - Metric updates are no-ops until a recorder is installed, so tests need no setup

pub mod logging;
pub mod metrics;
