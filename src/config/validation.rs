//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, windows > 0, addresses parse)
//! - Detect duplicate breaker, retry profile and policy names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::Method;
use thiserror::Error;

use crate::config::schema::{GuardConfig, RateLimitPolicyConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let mut breaker_names = HashSet::new();
    for (i, breaker) in config.breakers.iter().enumerate() {
        let field = |name: &str| format!("breakers[{}].{}", i, name);
        if breaker.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !breaker_names.insert(breaker.name.as_str()) {
            errors.push(ValidationError::new(field("name"), format!("duplicate breaker '{}'", breaker.name)));
        }
        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::new(field("failure_threshold"), "must be greater than 0"));
        }
        if breaker.success_threshold == 0 {
            errors.push(ValidationError::new(field("success_threshold"), "must be greater than 0"));
        }
        if breaker.timeout_ms == 0 {
            errors.push(ValidationError::new(field("timeout_ms"), "must be greater than 0"));
        }
        if breaker.reset_timeout_ms == 0 {
            errors.push(ValidationError::new(field("reset_timeout_ms"), "must be greater than 0"));
        }
    }

    let mut profile_names = HashSet::new();
    for (i, profile) in config.retries.profiles.iter().enumerate() {
        let field = |name: &str| format!("retries.profiles[{}].{}", i, name);
        if !profile_names.insert(profile.name.as_str()) {
            errors.push(ValidationError::new(field("name"), format!("duplicate profile '{}'", profile.name)));
        }
        if profile.max_delay_ms < profile.base_delay_ms {
            errors.push(ValidationError::new(field("max_delay_ms"), "must not be lower than base_delay_ms"));
        }
    }

    if let Some(global) = &config.rate_limit.global {
        check_policy(&mut errors, "rate_limit.global", global);
    }
    let mut policy_names = HashSet::new();
    for (i, policy) in config.rate_limit.policies.iter().enumerate() {
        let prefix = format!("rate_limit.policies[{}]", i);
        if !policy_names.insert(policy.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", prefix),
                format!("duplicate policy '{}'", policy.name),
            ));
        }
        check_policy(&mut errors, &prefix, policy);
    }

    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not a socket address", value)));
    }
}

fn check_policy(errors: &mut Vec<ValidationError>, prefix: &str, policy: &RateLimitPolicyConfig) {
    if policy.name.trim().is_empty() {
        errors.push(ValidationError::new(format!("{}.name", prefix), "must not be empty"));
    }
    if policy.max == 0 {
        errors.push(ValidationError::new(format!("{}.max", prefix), "must be greater than 0"));
    }
    if policy.window_secs == 0 {
        errors.push(ValidationError::new(format!("{}.window_secs", prefix), "must be greater than 0"));
    }
    if let Some(path) = &policy.path_prefix {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(format!("{}.path_prefix", prefix), "must start with '/'"));
        }
    }
    for method in &policy.methods {
        if Method::from_bytes(method.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                format!("{}.methods", prefix),
                format!("'{}' is not an HTTP method", method),
            ));
        }
    }
}
