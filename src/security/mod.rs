//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming API request:
//!     → rate_limit.rs (select global + route policy, derive key)
//!     → store.rs (atomic windowed increment; local fallback when down)
//!     → 429 if over budget, else pass to the handler
//!     → rate_limit.rs (give back hits matching the policy's skip rule)
//! ```
//!
//! # Design Decisions
//! - Fail open to a local budget, never to no budget
//! - No trust in client-supplied identity; only the auth layer's `Identity` extension counts

pub mod rate_limit;
pub mod store;

pub use rate_limit::{
    rate_limit_middleware, CounterBackend, Identity, RateLimitDecision, RateLimitPolicy, RateLimitRules,
    RateLimitState, RateLimiter,
};
pub use store::{CounterHit, CounterStore, MemoryCounterStore, StoreError};
