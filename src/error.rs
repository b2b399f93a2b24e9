//! Error taxonomy for guarded operations.
//!
//! Every rejection carries enough detail to act on (retry-after, which
//! threshold was hit) and nothing more: no matched fragments, no pattern
//! text, no key material.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::loader::join_violations;
use crate::config::ConfigViolation;
use crate::crypto::CryptoError;
use crate::threat::{Finding, ThreatLevel};

/// Boxed error used when a caller has no specific dependency error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why the concurrency limiter turned a caller away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionReason {
    /// Every slot busy and the wait queue full.
    QueueFull,
    /// Waited in the queue longer than the configured queue timeout.
    QueueTimeout,
}

impl fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionReason::QueueFull => f.write_str("queue full"),
            AdmissionReason::QueueTimeout => f.write_str("queue wait timed out"),
        }
    }
}

/// Errors returned by the middleware and its components.
///
/// `E` is the wrapped dependency's own error type and is passed through
/// unmodified in [`GuardError::Dependency`].
#[derive(Debug, Error)]
pub enum GuardError<E = BoxError> {
    #[error("payload rejected: threat level {threat_level} ({} finding(s))", .findings.len())]
    Validation {
        threat_level: ThreatLevel,
        findings: Vec<Finding>,
    },

    #[error("rate limited; retry after {}ms", .retry_after.as_millis())]
    RateLimited { retry_after: Duration, escalated: bool },

    #[error("admission rejected: {reason} (max_concurrent={max_concurrent}, max_queue={max_queue})")]
    AdmissionRejected {
        reason: AdmissionReason,
        max_concurrent: usize,
        max_queue: usize,
    },

    #[error("circuit open for dependency '{dependency}'")]
    CircuitOpen {
        dependency: String,
        retry_after: Option<Duration>,
    },

    #[error("call to '{dependency}' timed out after {}ms", .timeout.as_millis())]
    Timeout { dependency: String, timeout: Duration },

    #[error("field encryption failed")]
    Encryption(#[source] CryptoError),

    #[error("field decryption failed")]
    Decryption(#[source] CryptoError),

    #[error("dependency error: {0}")]
    Dependency(E),
}

impl<E> GuardError<E> {
    /// Stable label used in events and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::Validation { .. } => "threat_detected",
            GuardError::RateLimited { .. } => "rate_limited",
            GuardError::AdmissionRejected {
                reason: AdmissionReason::QueueFull,
                ..
            } => "queue_full",
            GuardError::AdmissionRejected {
                reason: AdmissionReason::QueueTimeout,
                ..
            } => "queue_timeout",
            GuardError::CircuitOpen { .. } => "circuit_open",
            GuardError::Timeout { .. } => "timeout",
            GuardError::Encryption(_) => "encryption_error",
            GuardError::Decryption(_) => "decryption_error",
            GuardError::Dependency(_) => "dependency_error",
        }
    }

    /// When the caller may reasonably try again, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GuardError::RateLimited { retry_after, .. } => Some(*retry_after),
            GuardError::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the middleware itself refused the operation before or instead
    /// of running it.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GuardError::Validation { .. }
                | GuardError::RateLimited { .. }
                | GuardError::AdmissionRejected { .. }
                | GuardError::CircuitOpen { .. }
        )
    }
}

/// Failures while assembling the middleware from configuration.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid configuration: {}", join_violations(.0))]
    Config(Vec<ConfigViolation>),

    #[error("invalid threat pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("encryption setup failed: {0}")]
    Crypto(#[from] CryptoError),
}
