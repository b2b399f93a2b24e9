//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, multipliers in range)
//! - Refuse fail-open policies for blocking threat levels
//! - Compile custom patterns so bad regexes fail at load, not at request time
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ConfigViolation>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use regex::Regex;

use crate::config::schema::GuardConfig;
use crate::threat::ThreatLevel;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation {
    /// Dotted path of the offending option.
    pub field: String,
    pub message: String,
}

impl ConfigViolation {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every violation.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ConfigViolation>> {
    let mut errors = Vec::new();

    let v = &config.validation;
    if v.max_payload_bytes == 0 {
        errors.push(ConfigViolation::new("validation.max_payload_bytes", "must be greater than 0"));
    }
    if v.max_depth == 0 {
        errors.push(ConfigViolation::new("validation.max_depth", "must be greater than 0"));
    }
    if v.max_collection_len == 0 {
        errors.push(ConfigViolation::new("validation.max_collection_len", "must be greater than 0"));
    }
    for (i, custom) in v.custom_patterns.iter().enumerate() {
        if let Err(e) = Regex::new(&custom.pattern) {
            errors.push(ConfigViolation::new(
                &format!("validation.custom_patterns[{}]", i),
                format!("invalid pattern: {}", e),
            ));
        }
        if custom.level == ThreatLevel::Clean {
            errors.push(ConfigViolation::new(
                &format!("validation.custom_patterns[{}].level", i),
                "a pattern cannot report CLEAN",
            ));
        }
    }

    for level in &config.threat_policy.fail_open_on {
        if *level != ThreatLevel::Low {
            errors.push(ConfigViolation::new(
                "threat_policy.fail_open_on",
                format!("{} cannot fail open; only LOW is allowed", level),
            ));
        }
    }

    let r = &config.rate_limit;
    if r.capacity == 0 {
        errors.push(ConfigViolation::new("rate_limit.capacity", "must be greater than 0"));
    }
    if !(r.refill_per_sec.is_finite() && r.refill_per_sec > 0.0) {
        errors.push(ConfigViolation::new("rate_limit.refill_per_sec", "must be a positive number"));
    }
    if !(r.penalty_multiplier > 0.0 && r.penalty_multiplier <= 1.0) {
        errors.push(ConfigViolation::new("rate_limit.penalty_multiplier", "must be in (0, 1]"));
    }
    if r.abuse_window_secs == 0 {
        errors.push(ConfigViolation::new("rate_limit.abuse_window_secs", "must be greater than 0"));
    }

    if config.concurrency.max_concurrent == 0 {
        errors.push(ConfigViolation::new("concurrency.max_concurrent", "must be greater than 0"));
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ConfigViolation::new("circuit_breaker.failure_threshold", "must be greater than 0"));
    }
    if cb.circuit_timeout_ms == 0 {
        errors.push(ConfigViolation::new("circuit_breaker.circuit_timeout_ms", "must be greater than 0"));
    }
    if cb.recovery_timeout_ms == 0 {
        errors.push(ConfigViolation::new("circuit_breaker.recovery_timeout_ms", "must be greater than 0"));
    }

    let e = &config.encryption;
    if e.key_rotation_days == 0 {
        errors.push(ConfigViolation::new("encryption.key_rotation_days", "must be greater than 0"));
    }
    if e.max_messages_per_key == 0 {
        errors.push(ConfigViolation::new("encryption.max_messages_per_key", "must be greater than 0"));
    }

    let o = &config.observability;
    if o.metrics_enabled && o.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ConfigViolation::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", o.metrics_address),
        ));
    }

    if config.maintenance.interval_secs == 0 {
        errors.push(ConfigViolation::new("maintenance.interval_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
