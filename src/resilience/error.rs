//! Error taxonomy for guarded dependency calls.

use std::time::Duration;

use thiserror::Error;

/// Whether an error is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, connection, timeout or 5xx: may succeed if retried.
    Transient,
    /// Validation, 4xx or an open circuit: retrying cannot help.
    Fatal,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Errors that know their own retry classification.
pub trait Classify {
    fn classify(&self) -> ErrorClass;

    fn is_transient(&self) -> bool {
        self.classify().is_transient()
    }
}

/// Errors surfaced by a [`CircuitBreaker`](super::circuit_breaker::CircuitBreaker).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open and no fallback was supplied.
    #[error("circuit breaker {name} is OPEN")]
    Open { name: String },

    /// The wrapped call did not finish within the call timeout.
    #[error("{name} call timed out after {}ms", .after.as_millis())]
    Timeout { name: String, after: Duration },

    /// The wrapped call (or the fallback) failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout { .. })
    }

    /// The underlying error, if the call itself failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: Classify> Classify for BreakerError<E> {
    fn classify(&self) -> ErrorClass {
        match self {
            // The caller decides when to come back; never retried internally.
            BreakerError::Open { .. } => ErrorClass::Fatal,
            BreakerError::Timeout { .. } => ErrorClass::Transient,
            BreakerError::Inner(e) => e.classify(),
        }
    }
}

/// Failure of an outbound dependency (SMS gateway, mail relay, ML service).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("rejected: {0}")]
    Validation(String),
}

impl Classify for DependencyError {
    fn classify(&self) -> ErrorClass {
        match self {
            DependencyError::ConnectionRefused(_) | DependencyError::TimedOut(_) => ErrorClass::Transient,
            DependencyError::Status { status, .. } if *status >= 500 => ErrorClass::Transient,
            DependencyError::Status { .. } | DependencyError::Validation(_) => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_classification() {
        assert!(DependencyError::ConnectionRefused("sms".into()).is_transient());
        assert!(DependencyError::TimedOut("smtp".into()).is_transient());
        assert!(DependencyError::Status { status: 503, message: "busy".into() }.is_transient());
        assert!(!DependencyError::Status { status: 422, message: "bad".into() }.is_transient());
        assert!(!DependencyError::Validation("phone".into()).is_transient());
    }

    #[test]
    fn test_open_circuit_is_never_retried() {
        let open: BreakerError<DependencyError> = BreakerError::Open { name: "sms".into() };
        assert_eq!(open.classify(), ErrorClass::Fatal);
        assert_eq!(open.to_string(), "circuit breaker sms is OPEN");

        let timeout: BreakerError<DependencyError> = BreakerError::Timeout {
            name: "ml".into(),
            after: Duration::from_millis(1500),
        };
        assert!(timeout.is_transient());
        assert_eq!(timeout.to_string(), "ml call timed out after 1500ms");
    }
}
