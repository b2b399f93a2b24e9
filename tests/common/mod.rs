//! Shared utilities for integration and load testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use zero_trust_guard::GuardConfig;

#[derive(Debug, Error, PartialEq)]
#[error("storage unavailable")]
pub struct StoreError;

/// How the mock store answers calls.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(dead_code)]
pub enum Mode {
    Healthy,
    Failing,
    Hanging,
}

/// In-memory storage dependency that counts every call it receives.
#[derive(Debug)]
pub struct MockStore {
    calls: AtomicUsize,
    docs: Mutex<Vec<Value>>,
    mode: Mutex<Mode>,
}

#[allow(dead_code)]
impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            docs: Mutex::new(Vec::new()),
            mode: Mutex::new(Mode::Healthy),
        })
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Documents exactly as the store received them.
    pub fn stored(&self) -> Vec<Value> {
        self.docs.lock().unwrap().clone()
    }

    /// Replace a stored document, simulating tampering at rest.
    pub fn overwrite(&self, index: usize, doc: Value) {
        self.docs.lock().unwrap()[index] = doc;
    }

    pub async fn write(&self, doc: Value) -> Result<Value, StoreError> {
        self.enter().await?;
        self.docs.lock().unwrap().push(doc.clone());
        Ok(doc)
    }

    pub async fn read_all(&self) -> Result<Value, StoreError> {
        self.enter().await?;
        Ok(Value::Array(self.stored()))
    }

    pub async fn query(&self, _filter: Value) -> Result<Value, StoreError> {
        self.enter().await?;
        let count = self.docs.lock().unwrap().len();
        Ok(serde_json::json!({ "matched": count }))
    }

    async fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Healthy => Ok(()),
            Mode::Failing => Err(StoreError),
            Mode::Hanging => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }
    }
}

/// Defaults with short breaker timings and a rate limit loose enough not to
/// interfere with tests that are not about rate limiting.
#[allow(dead_code)]
pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.circuit_timeout_ms = 100;
    config.circuit_breaker.recovery_timeout_ms = 1_000;
    config.rate_limit.capacity = 10_000;
    config.rate_limit.refill_per_sec = 10_000.0;
    config.concurrency.max_concurrent = 64;
    config.concurrency.max_queue = 64;
    config
}
