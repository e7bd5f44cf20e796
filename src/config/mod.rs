//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → breakers, retry profiles and rate-limit rules built from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps rate-limit rules atomically
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Defaults mirror the production budgets of the intake API

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BreakerConfig, GuardConfig, KeyStrategy, ListenerConfig, ObservabilityConfig,
    RateLimitConfig, RateLimitPolicyConfig, RetryConfig, RetryProfileConfig, TimeoutConfig,
};
