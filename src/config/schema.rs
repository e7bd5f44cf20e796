//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Circuit breakers, one per protected dependency.
    pub breakers: Vec<BreakerConfig>,

    /// Retry profiles, looked up by dependency name.
    pub retries: RetryConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            breakers: default_breakers(),
            retries: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Circuit breaker options for one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BreakerConfig {
    /// Dependency name, unique across breakers.
    pub name: String,

    /// Consecutive failures (while Closed) that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive Half-Open successes that close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Deadline for a single wrapped call in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub timeout_ms: u64,

    /// Time spent Open before a probe is allowed, in milliseconds.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl BreakerConfig {
    /// Breaker with the default thresholds and timeouts.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_call_timeout_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_breakers() -> Vec<BreakerConfig> {
    let with = |name: &str, failure_threshold: u32, timeout_ms: u64| BreakerConfig {
        failure_threshold,
        timeout_ms,
        ..BreakerConfig::named(name)
    };
    vec![
        with("sms", 3, 5_000),
        with("email", 3, 10_000),
        with("ml", 5, 15_000),
        with("counter_store", 3, 2_000),
    ]
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Named retry profiles.
    pub profiles: Vec<RetryProfileConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let with = |name: &str, max_retries: u32, base_delay_ms: u64| RetryProfileConfig {
            max_retries,
            base_delay_ms,
            ..RetryProfileConfig::named(name)
        };
        Self {
            profiles: vec![with("sms", 3, 2_000), with("email", 3, 2_000), with("ml", 2, 1_000)],
        }
    }
}

impl RetryConfig {
    /// Find a profile by dependency name.
    pub fn profile(&self, name: &str) -> Option<&RetryProfileConfig> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

/// A single retry profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryProfileConfig {
    /// Profile name (usually the dependency name).
    pub name: String,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay, in milliseconds.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl RetryProfileConfig {
    /// Profile with the default backoff settings.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    1_000
}

/// How a rate limit key is derived from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Requester IP address.
    #[default]
    Ip,
    /// Authenticated identity id, falling back to IP for anonymous requests.
    Identity,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Budget applied to every API request.
    pub global: Option<RateLimitPolicyConfig>,

    /// Route-specific budgets, applied in addition to the global one.
    pub policies: Vec<RateLimitPolicyConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mins = |m: u64| m * 60;
        Self {
            enabled: true,
            global: Some(RateLimitPolicyConfig {
                message: "Too many requests from this IP. Please try again later.".into(),
                ..RateLimitPolicyConfig::new("global", 50, mins(15))
            }),
            policies: vec![
                RateLimitPolicyConfig {
                    path_prefix: Some("/api/auth".into()),
                    message: "Too many authentication attempts. Please try again in 15 minutes.".into(),
                    skip_successful_requests: true,
                    ..RateLimitPolicyConfig::new("auth", 5, mins(15))
                },
                RateLimitPolicyConfig {
                    path_prefix: Some("/api/auth/otp".into()),
                    message: "Too many OTP requests. Please try again in 1 hour.".into(),
                    ..RateLimitPolicyConfig::new("otp", 3, mins(60))
                },
                RateLimitPolicyConfig {
                    path_prefix: Some("/api/auth/password-reset".into()),
                    message: "Too many password reset requests. Please try again in 1 hour.".into(),
                    ..RateLimitPolicyConfig::new("password_reset", 3, mins(60))
                },
                RateLimitPolicyConfig {
                    path_prefix: Some("/api/uploads".into()),
                    message: "Too many file uploads. Please try again later.".into(),
                    skip_failed_requests: true,
                    ..RateLimitPolicyConfig::new("upload", 20, mins(60))
                },
                RateLimitPolicyConfig {
                    path_prefix: Some("/api".into()),
                    methods: vec!["GET".into(), "HEAD".into()],
                    skip_failed_requests: true,
                    ..RateLimitPolicyConfig::new("read", 100, mins(15))
                },
                RateLimitPolicyConfig {
                    path_prefix: Some("/api".into()),
                    methods: vec!["POST".into(), "PUT".into(), "PATCH".into(), "DELETE".into()],
                    message: "Too many write requests. Please try again later.".into(),
                    key: KeyStrategy::Identity,
                    skip_failed_requests: true,
                    ..RateLimitPolicyConfig::new("write", 30, mins(15))
                },
                RateLimitPolicyConfig {
                    path_prefix: Some("/api/admin".into()),
                    message: "Too many admin requests. Please try again later.".into(),
                    key: KeyStrategy::Identity,
                    ..RateLimitPolicyConfig::new("admin", 50, mins(15))
                },
            ],
        }
    }
}

/// One fixed-window budget.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitPolicyConfig {
    /// Policy name; also namespaces the counter keys (`rl:<name>:`).
    pub name: String,

    /// Path prefix the policy applies to. `None` matches every path.
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// HTTP methods the policy applies to. Empty matches every method.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Maximum requests per window.
    pub max: u64,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Key derivation.
    #[serde(default)]
    pub key: KeyStrategy,

    /// Message returned in the 429 body.
    #[serde(default = "default_limit_message")]
    pub message: String,

    /// Do not count responses with status < 400.
    #[serde(default)]
    pub skip_successful_requests: bool,

    /// Do not count responses with status >= 400.
    #[serde(default)]
    pub skip_failed_requests: bool,
}

impl RateLimitPolicyConfig {
    /// Policy with only the budget set.
    pub fn new(name: impl Into<String>, max: u64, window_secs: u64) -> Self {
        Self {
            name: name.into(),
            path_prefix: None,
            methods: Vec::new(),
            max,
            window_secs,
            key: KeyStrategy::Ip,
            message: default_limit_message(),
            skip_successful_requests: false,
            skip_failed_requests: false,
        }
    }
}

fn default_limit_message() -> String {
    "Too many requests. Please try again later.".to_string()
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_known_dependencies() {
        let config = GuardConfig::default();
        let names: Vec<_> = config.breakers.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["sms", "email", "ml", "counter_store"]);

        let sms = config.retries.profile("sms").unwrap();
        assert_eq!(sms.max_retries, 3);
        assert_eq!(sms.base_delay_ms, 2_000);
    }

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config: GuardConfig = toml::from_str(
            r#"
            [[breakers]]
            name = "sms"
            failure_threshold = 3

            [rate_limit]
            enabled = true
            [[rate_limit.policies]]
            name = "otp"
            path_prefix = "/api/otp"
            max = 3
            window_secs = 3600
            key = "identity"
            "#,
        )
        .unwrap();

        assert_eq!(config.breakers.len(), 1);
        assert_eq!(config.breakers[0].success_threshold, 2);
        assert_eq!(config.breakers[0].reset_timeout_ms, 30_000);

        let otp = &config.rate_limit.policies[0];
        assert_eq!(otp.key, KeyStrategy::Identity);
        assert!(otp.methods.is_empty());
        assert!(!otp.skip_failed_requests);
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }
}
