//! Failure injection tests for the security middleware.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use zero_trust_guard::clock::ManualClock;
use zero_trust_guard::config::load_config;
use zero_trust_guard::crypto::CryptoError;
use zero_trust_guard::observability::{ChannelEventSink, SecurityEvent};
use zero_trust_guard::resilience::BreakerState;
use zero_trust_guard::threat::{ThreatFamily, ThreatLevel};
use zero_trust_guard::{GuardError, Operation, Registry};

mod common;
use common::{test_config, MockStore, Mode, StoreError};

const SAFE_INPUTS: &[&str] = &[
    "Select the best option from the list",
    "Tom & Jerry",
    "Dog & Cat",
    "Pet food: Dog & Cat",
    "Salt & Pepper | ID",
    "O'Brien and Sons",
    "Please confirm (required)",
    "50% off everything",
    "alice@example.com",
    "Order 1234 shipped on 2024-01-15",
    "The quick brown fox jumps over the lazy dog",
];

const MALICIOUS_INPUTS: &[&str] = &[
    "'; DROP TABLE users; --",
    "1 UNION SELECT password FROM users",
    "admin' OR '1'='1",
    "' or ''='",
    "') OR ('1'='1",
    "') or ('a'='a",
    "admin' #",
    "1 OR 1=1",
    "<script>alert(1)</script>",
    "<img src=x onerror=alert(1)>",
    "javascript:alert(document.cookie)",
    "; rm -rf /",
    "; sleep 10",
    "; echo pwned",
    "$(whoami)",
    "cat /etc/passwd",
    "*)(uid=*))(|(uid=*",
];

fn registry_with_clock(config: zero_trust_guard::GuardConfig) -> (Registry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let registry = Registry::builder(config)
        .clock(clock.clone())
        .without_maintenance()
        .start()
        .unwrap();
    (registry, clock)
}

async fn write(registry: &Registry, store: &MockStore, principal: &str, doc: Value) -> Result<Value, GuardError<StoreError>> {
    registry
        .middleware()
        .protect(Operation::write(principal, "orders", doc), |p| store.write(p))
        .await
}

#[tokio::test]
async fn test_drop_table_rejected_before_dependency() {
    let (sink, mut events) = ChannelEventSink::new();
    let registry = Registry::builder(test_config())
        .events(Arc::new(sink))
        .without_maintenance()
        .start()
        .unwrap();
    let store = MockStore::new();

    let err = write(&registry, &store, "mallory", json!({"name": "'; DROP TABLE users; --"}))
        .await
        .unwrap_err();

    match &err {
        GuardError::Validation { threat_level, findings } => {
            assert_eq!(*threat_level, ThreatLevel::Critical);
            assert!(findings.iter().any(|f| f.family == ThreatFamily::Sql));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(!err.to_string().contains("DROP"));
    assert_eq!(store.calls(), 0);

    let mut detected = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SecurityEvent::ThreatDetected { principal_id, blocked, .. } = event {
            detected.push((principal_id, blocked));
        }
    }
    assert_eq!(detected, vec![("mallory".to_string(), true)]);
    registry.teardown().await;
}

#[tokio::test]
async fn test_curated_sets_have_no_misclassifications() {
    let registry = Registry::builder(test_config()).without_maintenance().start().unwrap();
    let store = MockStore::new();

    for input in SAFE_INPUTS {
        assert!(registry.middleware().validate(&json!({"q": input})).is_clean(), "finding on {input:?}");
        let result = registry
            .middleware()
            .protect(Operation::query("alice", "orders", json!({"q": input})), |p| store.query(p))
            .await;
        assert!(result.is_ok(), "false positive on {input:?}");
    }
    assert_eq!(store.calls(), SAFE_INPUTS.len());

    for input in MALICIOUS_INPUTS {
        let verdict = registry.middleware().validate(&json!({"q": input}));
        assert!(verdict.threat_level >= ThreatLevel::High, "{input:?} scored {}", verdict.threat_level);
        let err = registry
            .middleware()
            .protect(Operation::query("alice", "orders", json!({"q": input})), |p| store.query(p))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "threat_detected", "false negative on {input:?}");
    }
    assert_eq!(store.calls(), SAFE_INPUTS.len());
    registry.teardown().await;
}

#[tokio::test]
async fn test_nosql_operator_keys_rejected() {
    let registry = Registry::builder(test_config()).without_maintenance().start().unwrap();
    let store = MockStore::new();

    let err = registry
        .middleware()
        .protect(
            Operation::query("alice", "orders", json!({"user": {"$where": "this.a == this.b"}})),
            |p| store.query(p),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GuardError::Validation { threat_level: ThreatLevel::Critical, .. }));
    assert_eq!(store.calls(), 0);
    registry.teardown().await;
}

#[tokio::test]
async fn test_low_finding_passes_unless_policy_is_strict() {
    let registry = Registry::builder(test_config()).without_maintenance().start().unwrap();
    let store = MockStore::new();
    let op = || Operation::query("alice", "orders", json!({"q": "search%3Cterm"}));

    assert!(registry.middleware().protect(op(), |p| store.query(p)).await.is_ok());
    assert_eq!(store.calls(), 1);

    let mut strict = test_config();
    strict.threat_policy.fail_open_on.clear();
    registry.apply(strict).unwrap();

    let err = registry.middleware().protect(op(), |p| store.query(p)).await.unwrap_err();
    assert!(matches!(err, GuardError::Validation { threat_level: ThreatLevel::Low, .. }));
    assert_eq!(store.calls(), 1);
    registry.teardown().await;
}

#[tokio::test]
async fn test_circuit_opens_then_recovers() {
    let (registry, clock) = registry_with_clock(test_config());
    let store = MockStore::new();
    store.set_mode(Mode::Failing);

    for _ in 0..3 {
        let err = write(&registry, &store, "alice", json!({"n": 1})).await.unwrap_err();
        assert!(matches!(err, GuardError::Dependency(StoreError)));
    }

    let err = write(&registry, &store, "alice", json!({"n": 1})).await.unwrap_err();
    assert_eq!(err.kind(), "circuit_open");
    assert!(err.retry_after().is_some());
    assert_eq!(store.calls(), 3);

    clock.advance(Duration::from_millis(1_001));
    store.set_mode(Mode::Healthy);
    assert!(write(&registry, &store, "alice", json!({"n": 2})).await.is_ok());
    assert_eq!(
        registry.middleware().breakers().get("orders").state(),
        BreakerState::Closed
    );
    registry.teardown().await;
}

#[tokio::test]
async fn test_circuits_are_per_dependency() {
    let registry = Registry::builder(test_config()).without_maintenance().start().unwrap();
    let store = MockStore::new();
    store.set_mode(Mode::Failing);

    for _ in 0..4 {
        let _ = write(&registry, &store, "alice", json!({})).await;
    }
    store.set_mode(Mode::Healthy);

    let result = registry
        .middleware()
        .protect(Operation::write("alice", "invoices", json!({})), |p| store.write(p))
        .await;
    assert!(result.is_ok());
    assert_eq!(registry.middleware().breakers().get("orders").state(), BreakerState::Open);
    registry.teardown().await;
}

#[tokio::test]
async fn test_hanging_dependency_times_out() {
    let registry = Registry::builder(test_config()).without_maintenance().start().unwrap();
    let store = MockStore::new();
    store.set_mode(Mode::Hanging);

    let started = std::time::Instant::now();
    let err = write(&registry, &store, "alice", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(registry.middleware().concurrency().in_flight(), 0);
    registry.teardown().await;
}

#[tokio::test]
async fn test_rate_limit_rejects_with_retry_after() {
    let mut config = test_config();
    config.rate_limit.capacity = 5;
    config.rate_limit.refill_per_sec = 0.5;
    let registry = Registry::builder(config).without_maintenance().start().unwrap();
    let store = MockStore::new();

    for _ in 0..5 {
        write(&registry, &store, "alice", json!({})).await.unwrap();
    }
    let err = write(&registry, &store, "alice", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "rate_limited");
    let retry_after = err.retry_after().unwrap();
    assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(2));
    assert_eq!(store.calls(), 5);

    assert!(write(&registry, &store, "bob", json!({})).await.is_ok());
    registry.teardown().await;
}

#[tokio::test]
async fn test_saturation_rejects_with_queue_full() {
    let mut config = test_config();
    config.concurrency.max_concurrent = 1;
    config.concurrency.max_queue = 0;
    config.circuit_breaker.circuit_timeout_ms = 30_000;
    let registry = Registry::builder(config).without_maintenance().start().unwrap();
    let middleware = registry.middleware().clone();
    let store = MockStore::new();
    store.set_mode(Mode::Hanging);

    let blocked = {
        let middleware = middleware.clone();
        let store = store.clone();
        tokio::spawn(async move {
            middleware
                .protect(Operation::write("alice", "orders", json!({})), move |p| async move {
                    store.write(p).await
                })
                .await
        })
    };
    while middleware.concurrency().in_flight() < 1 {
        tokio::task::yield_now().await;
    }

    let err = write(&registry, &store, "bob", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "queue_full");
    assert!(err.to_string().contains("max_concurrent=1, max_queue=0"));

    blocked.abort();
    let _ = blocked.await;
    assert_eq!(middleware.concurrency().in_flight(), 0);
    registry.teardown().await;
}

#[tokio::test]
async fn test_sensitive_fields_encrypted_at_rest() {
    let registry = Registry::builder(test_config()).without_maintenance().start().unwrap();
    let store = MockStore::new();
    let doc = json!({"name": "Ada", "ssn": "078-05-1120"});

    let written = registry
        .middleware()
        .protect(
            Operation::write("alice", "users", doc.clone()).with_sensitive_fields(["ssn"]),
            |p| store.write(p),
        )
        .await
        .unwrap();
    assert_eq!(written, doc);

    let at_rest = &store.stored()[0];
    assert_eq!(at_rest["name"], "Ada");
    assert_eq!(at_rest["ssn"]["alg"], "AES-256-GCM");
    assert!(!at_rest.to_string().contains("078-05-1120"));

    let read = registry
        .middleware()
        .protect(
            Operation::read("alice", "users", json!({})).with_sensitive_fields(["ssn"]),
            |_| store.read_all(),
        )
        .await
        .unwrap();
    assert_eq!(read, json!([doc]));
    registry.teardown().await;
}

#[tokio::test]
async fn test_tampered_ciphertext_fails_closed() {
    let registry = Registry::builder(test_config()).without_maintenance().start().unwrap();
    let store = MockStore::new();
    registry
        .middleware()
        .protect(
            Operation::write("alice", "users", json!({"ssn": "078-05-1120"})).with_sensitive_fields(["ssn"]),
            |p| store.write(p),
        )
        .await
        .unwrap();

    let mut tampered = store.stored()[0].clone();
    tampered["ssn"]["tag"] = json!("AAAAAAAAAAAAAAAAAAAAAA==");
    store.overwrite(0, tampered);

    let err = registry
        .middleware()
        .protect(
            Operation::read("alice", "users", json!({})).with_sensitive_fields(["ssn"]),
            |_| store.read_all(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GuardError::Decryption(CryptoError::Authentication)));
    registry.teardown().await;
}

#[tokio::test]
async fn test_rotation_keeps_old_records_readable_until_purge() {
    let mut config = test_config();
    config.encryption.key_rotation_days = 10;
    config.encryption.key_rotation_grace_days = 2;
    config.encryption.key_retention_days = 5;
    let (registry, clock) = registry_with_clock(config);
    let store = MockStore::new();
    let day = Duration::from_secs(24 * 60 * 60);
    let encryption = registry.middleware().encryption().clone();

    let sensitive_write = |doc: Value| Operation::write("alice", "users", doc).with_sensitive_fields(["ssn"]);
    let sensitive_read = || Operation::read("alice", "users", json!({})).with_sensitive_fields(["ssn"]);

    registry
        .middleware()
        .protect(sensitive_write(json!({"ssn": "111-11-1111"})), |p| store.write(p))
        .await
        .unwrap();
    let first_key = encryption.active_key().unwrap().key_id;

    clock.advance(day * 11);
    let report = encryption.tick().unwrap();
    assert_eq!(report.rotating, vec![first_key.clone()]);

    registry
        .middleware()
        .protect(sensitive_write(json!({"ssn": "222-22-2222"})), |p| store.write(p))
        .await
        .unwrap();
    assert_ne!(store.stored()[1]["ssn"]["key_id"], json!(first_key));

    let read = registry
        .middleware()
        .protect(sensitive_read(), |_| store.read_all())
        .await
        .unwrap();
    assert_eq!(read, json!([{"ssn": "111-11-1111"}, {"ssn": "222-22-2222"}]));

    clock.advance(day * 3);
    assert_eq!(encryption.tick().unwrap().retired, vec![first_key.clone()]);
    clock.advance(day * 6);
    assert_eq!(encryption.tick().unwrap().purged, vec![first_key.clone()]);

    let err = registry
        .middleware()
        .protect(sensitive_read(), |_| store.read_all())
        .await
        .unwrap_err();
    assert!(matches!(err, GuardError::Decryption(CryptoError::UnknownKey(id)) if id == first_key));
    registry.teardown().await;
}

#[tokio::test]
async fn test_config_file_hot_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guard.toml");
    std::fs::write(&path, "[threat_policy]\nfail_open_on = [\"LOW\"]\n").unwrap();

    let config = load_config(&path).unwrap();
    let mut registry = Registry::builder(config).without_maintenance().start().unwrap();
    let _watcher = registry.watch(&path).unwrap();
    assert!(!registry.middleware().threat_policy().fail_open_on.is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&path, "[threat_policy]\nfail_open_on = []\n").unwrap();

    let reloaded = tokio::time::timeout(Duration::from_secs(10), async {
        while !registry.middleware().threat_policy().fail_open_on.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(reloaded.is_ok(), "config change was not applied");
    registry.teardown().await;
}
