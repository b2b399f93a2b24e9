//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::threat::{ThreatFamily, ThreatLevel};

/// Root configuration for the security middleware.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Structural limits, allow lists and custom patterns.
    pub validation: ValidationConfig,

    /// Which non-blocking threat levels may pass.
    pub threat_policy: ThreatPolicyConfig,

    /// Per-principal rate limiting.
    pub rate_limit: RateLimitConfig,

    /// In-flight operation admission.
    pub concurrency: ConcurrencyConfig,

    /// Storage dependency circuit breaking.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Field encryption and key rotation.
    pub encryption: EncryptionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Background maintenance.
    pub maintenance: MaintenanceConfig,
}

/// Payload validation configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum estimated serialized size of a payload in bytes.
    pub max_payload_bytes: usize,

    /// Maximum nesting depth of a structured payload.
    pub max_depth: usize,

    /// Maximum number of elements in any array or object.
    pub max_collection_len: usize,

    /// Enumerated safe values per field name; these skip pattern matching.
    pub allow_lists: HashMap<String, Vec<String>>,

    /// Extra patterns appended to the built-in library.
    pub custom_patterns: Vec<CustomPattern>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 256 * 1024,
            max_depth: 32,
            max_collection_len: 10_000,
            allow_lists: HashMap::new(),
            custom_patterns: Vec::new(),
        }
    }
}

/// A user-supplied detection pattern.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CustomPattern {
    pub family: ThreatFamily,
    pub pattern: String,
    pub level: ThreatLevel,
}

/// Threat policy: levels listed here are logged and let through. Only LOW
/// is accepted.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThreatPolicyConfig {
    pub fail_open_on: Vec<ThreatLevel>,
}

impl Default for ThreatPolicyConfig {
    fn default() -> Self {
        Self {
            fail_open_on: vec![ThreatLevel::Low],
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Token bucket capacity per principal.
    #[serde(alias = "rate_capacity")]
    pub capacity: u32,

    /// Tokens refilled per second.
    #[serde(alias = "rate_refill_per_sec")]
    pub refill_per_sec: f64,

    /// Denials within the abuse window that trigger a penalty.
    pub abuse_threshold: u32,

    /// Sliding window for counting denials, in seconds.
    pub abuse_window_secs: u64,

    /// How long a penalty lasts, in seconds.
    pub penalty_secs: u64,

    /// Factor applied to capacity and refill rate while penalized.
    pub penalty_multiplier: f64,

    /// Idle principal state is evicted after this many seconds.
    pub idle_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100,
            refill_per_sec: 50.0,
            abuse_threshold: 20,
            abuse_window_secs: 60,
            penalty_secs: 300,
            penalty_multiplier: 0.25,
            idle_ttl_secs: 600,
        }
    }
}

impl RateLimitConfig {
    pub fn abuse_window(&self) -> Duration {
        Duration::from_secs(self.abuse_window_secs)
    }

    pub fn penalty(&self) -> Duration {
        Duration::from_secs(self.penalty_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

/// Concurrency admission configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum operations in flight.
    pub max_concurrent: usize,

    /// Maximum callers waiting for a slot.
    #[serde(alias = "max_queue_size")]
    pub max_queue: usize,

    /// Maximum time a caller may wait in the queue (0 = no limit).
    pub queue_timeout_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1000,
            max_queue: 1000,
            queue_timeout_ms: 0,
        }
    }
}

impl ConcurrencyConfig {
    pub fn queue_timeout(&self) -> Option<Duration> {
        (self.queue_timeout_ms > 0).then(|| Duration::from_millis(self.queue_timeout_ms))
    }
}

/// Circuit breaker configuration, applied to every dependency.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Per-call deadline in milliseconds.
    #[serde(alias = "circuit_timeout")]
    pub circuit_timeout_ms: u64,

    /// Time an open circuit waits before allowing a probe, in milliseconds.
    #[serde(alias = "recovery_timeout")]
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            circuit_timeout_ms: 5_000,
            recovery_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.circuit_timeout_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Field encryption configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Days an ACTIVE key is used before rotation.
    pub key_rotation_days: u32,

    /// Days a replaced key stays in ROTATING before it is RETIRED.
    pub key_rotation_grace_days: u32,

    /// Days a RETIRED key is kept for decryption before it is purged.
    pub key_retention_days: u32,

    /// Encryptions allowed under one key before a forced rotation.
    pub max_messages_per_key: u64,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_rotation_days: 90,
            key_rotation_grace_days: 30,
            key_retention_days: 365,
            max_messages_per_key: 1u64 << 32,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
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
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Background maintenance configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval between key rotation ticks and idle-state sweeps, in seconds.
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}
