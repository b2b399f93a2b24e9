//! The protect pipeline.
//!
//! # Data Flow
//! ```text
//! protect(op, call):
//!     → ZeroTrustValidator   (HIGH/CRITICAL → Validation error)
//!     → AdaptiveRateLimiter  (no token → RateLimited error)
//!     → ConcurrencyLimiter   (queue full / timed out → AdmissionRejected)
//!     → encrypt_fields       (Write operations only)
//!     → CircuitBreaker::call (CircuitOpen / Timeout / Dependency(E))
//!     → decrypt_fields       (every result document, fail closed)
//!     → result
//! ```
//!
//! # Design Decisions
//! - Cheap rejections first: validation and rate limiting never wait, so
//!   load is shed before a concurrency slot is taken
//! - Any rejection short-circuits every later stage
//! - The concurrency permit is held until decryption finishes
//! - Validator and threat policy live behind `ArcSwap` for hot reload

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use serde_json::Value;

use super::operation::{Operation, OperationKind};
use crate::clock::Clock;
use crate::config::{GuardConfig, ThreatPolicyConfig};
use crate::crypto::{decrypt_fields, encrypt_fields, EncryptionManager, KeyCustodian};
use crate::error::{GuardError, InitError};
use crate::observability::metrics;
use crate::observability::{EventSink, SecurityEvent};
use crate::resilience::CircuitBreakerRegistry;
use crate::security::{AdaptiveRateLimiter, Admission, ConcurrencyLimiter};
use crate::threat::{ValidationVerdict, ZeroTrustValidator};

/// Composition root for validation, admission, circuit breaking and field
/// encryption.
pub struct SecurityMiddleware {
    validator: ArcSwap<ZeroTrustValidator>,
    policy: ArcSwap<ThreatPolicyConfig>,
    rate_limiter: Arc<AdaptiveRateLimiter>,
    concurrency: Arc<ConcurrencyLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    encryption: Arc<EncryptionManager>,
    events: Arc<dyn EventSink>,
}

impl SecurityMiddleware {
    /// Build every component from `config`.
    pub fn new(
        config: &GuardConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        custodian: Arc<dyn KeyCustodian>,
    ) -> Result<Self, InitError> {
        let validator = ZeroTrustValidator::from_config(&config.validation)?;
        let encryption = EncryptionManager::new(config.encryption.clone(), custodian, clock.clone(), events.clone())?;

        Ok(Self {
            validator: ArcSwap::from_pointee(validator),
            policy: ArcSwap::from_pointee(config.threat_policy.clone()),
            rate_limiter: Arc::new(AdaptiveRateLimiter::new(config.rate_limit.clone(), clock.clone())),
            concurrency: Arc::new(ConcurrencyLimiter::new(&config.concurrency)),
            breakers: Arc::new(CircuitBreakerRegistry::new(
                config.circuit_breaker.clone(),
                clock,
                events.clone(),
            )),
            encryption: Arc::new(encryption),
            events,
        })
    }

    /// Run `call` for `op` through the full pipeline.
    ///
    /// `call` receives the payload as it should be stored: sanitized if the
    /// policy let a low-level finding through, with sensitive fields
    /// encrypted for writes. It is never invoked if any stage rejects.
    pub async fn protect<E, F, Fut>(&self, op: Operation, call: F) -> Result<Value, GuardError<E>>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let start = Instant::now();
        let dependency = op.dependency.clone();
        let result = self.run(op, call).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => {
                if e.is_rejection() {
                    metrics::record_rejection(e.kind());
                }
                e.kind()
            }
        };
        metrics::record_operation(&dependency, outcome, start);
        result
    }

    async fn run<E, F, Fut>(&self, op: Operation, call: F) -> Result<Value, GuardError<E>>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let Operation {
            principal_id,
            dependency,
            kind,
            payload,
            sensitive_fields,
        } = op;

        let mut payload = self.screen(&principal_id, &dependency, payload)?;

        if let Admission::Deny { retry_after, escalated } = self.rate_limiter.admit(&principal_id) {
            self.events.emit(SecurityEvent::RateLimited {
                principal_id,
                retry_after_ms: retry_after.as_millis() as u64,
                escalated,
            });
            return Err(GuardError::RateLimited { retry_after, escalated });
        }

        let permit = match self.concurrency.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                if let GuardError::AdmissionRejected {
                    reason,
                    max_concurrent,
                    max_queue,
                } = &e
                {
                    self.events.emit(SecurityEvent::QueueFull {
                        principal_id,
                        dependency,
                        reason: reason.to_string(),
                        max_concurrent: *max_concurrent,
                        max_queue: *max_queue,
                    });
                }
                return Err(e);
            }
        };

        if kind == OperationKind::Write && !sensitive_fields.is_empty() {
            encrypt_fields(&self.encryption, &mut payload, &sensitive_fields, &dependency)
                .map_err(GuardError::Encryption)?;
        }

        let breaker = self.breakers.get(&dependency);
        let mut result = breaker.call(|| call(payload)).await?;

        if !sensitive_fields.is_empty() {
            self.reveal(&mut result, &sensitive_fields, &dependency)?;
        }
        tracing::debug!(
            principal = %principal_id,
            dependency = %dependency,
            kind = ?kind,
            queued = permit.was_queued(),
            "Operation completed"
        );
        permit.release();
        Ok(result)
    }

    /// Validate and apply the threat policy. Returns the payload to forward.
    fn screen<E>(&self, principal_id: &str, dependency: &str, payload: Value) -> Result<Value, GuardError<E>> {
        let verdict = self.validate(&payload);
        metrics::record_validation(verdict.threat_level.as_str());
        if verdict.is_clean() {
            return Ok(payload);
        }

        let allowed = verdict.is_allowed(&self.policy.load());
        self.events.emit(SecurityEvent::ThreatDetected {
            principal_id: principal_id.to_string(),
            dependency: dependency.to_string(),
            threat_level: verdict.threat_level,
            families: verdict.families(),
            finding_count: verdict.findings.len(),
            blocked: !allowed,
        });

        if !allowed {
            return Err(GuardError::Validation {
                threat_level: verdict.threat_level,
                findings: verdict.findings,
            });
        }
        Ok(verdict.sanitized_payload.unwrap_or(payload))
    }

    /// Decrypt sensitive fields of a result document, or of each document in
    /// a result array.
    fn reveal<E>(&self, result: &mut Value, fields: &[String], dependency: &str) -> Result<(), GuardError<E>> {
        match result {
            Value::Array(documents) => {
                for document in documents {
                    decrypt_fields(&self.encryption, document, fields, dependency).map_err(GuardError::Decryption)?;
                }
            }
            document => {
                decrypt_fields(&self.encryption, document, fields, dependency).map_err(GuardError::Decryption)?;
            }
        }
        Ok(())
    }

    /// Validate a payload with the current validator.
    pub fn validate(&self, payload: &Value) -> ValidationVerdict {
        self.validator.load().validate(payload)
    }

    /// Swap in validation settings and threat policy from `config`.
    ///
    /// Other sections are ignored; they take effect on restart.
    pub fn reload(&self, config: &GuardConfig) -> Result<(), regex::Error> {
        let validator = ZeroTrustValidator::from_config(&config.validation)?;
        self.validator.store(Arc::new(validator));
        self.policy.store(Arc::new(config.threat_policy.clone()));
        tracing::info!(
            max_depth = config.validation.max_depth,
            custom_patterns = config.validation.custom_patterns.len(),
            "Validation settings reloaded"
        );
        Ok(())
    }

    pub fn threat_policy(&self) -> Arc<ThreatPolicyConfig> {
        self.policy.load_full()
    }

    pub fn rate_limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.rate_limiter
    }

    pub fn concurrency(&self) -> &Arc<ConcurrencyLimiter> {
        &self.concurrency
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn encryption(&self) -> &Arc<EncryptionManager> {
        &self.encryption
    }
}

impl std::fmt::Debug for SecurityMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityMiddleware")
            .field("rate_limiter", &self.rate_limiter)
            .field("concurrency", &self.concurrency)
            .field("breakers", &self.breakers)
            .field("encryption", &self.encryption)
            .finish()
    }
}
