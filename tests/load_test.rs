//! Load testing for the security middleware.

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::json;
use zero_trust_guard::{Operation, Registry};

mod common;
use common::{test_config, MockStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_performance() {
    let mut config = test_config();
    config.concurrency.max_concurrent = 32;
    config.concurrency.max_queue = 1_000;
    let registry = Registry::builder(config).without_maintenance().start().unwrap();
    let middleware = registry.middleware().clone();
    let store = MockStore::new();

    let total_ops = 1_000;
    let start = Instant::now();

    let tasks = (0..total_ops).map(|i| {
        let middleware = middleware.clone();
        let store = store.clone();
        tokio::spawn(async move {
            let op = Operation::write(
                format!("user-{}", i % 50),
                "orders",
                json!({"order": i, "email": format!("user{}@example.com", i), "ssn": "078-05-1120"}),
            )
            .with_sensitive_fields(["ssn"]);
            middleware
                .protect(op, move |p| async move { store.write(p).await })
                .await
        })
    });
    let results = join_all(tasks).await;

    let elapsed = start.elapsed();
    let succeeded = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    let ops_per_sec = total_ops as f64 / elapsed.as_secs_f64();

    println!("--- Load Test Results ---");
    println!("Total operations: {}", total_ops);
    println!("Succeeded: {}", succeeded);
    println!("Total time: {:?}", elapsed);
    println!("Throughput: {:.2} ops/sec", ops_per_sec);
    println!("-------------------------");

    assert_eq!(succeeded, total_ops);
    assert_eq!(store.calls(), total_ops);
    assert_eq!(middleware.concurrency().in_flight(), 0);
    assert!(elapsed < Duration::from_secs(60));

    registry.teardown().await;
}

#[tokio::test]
async fn test_validation_throughput() {
    let registry = Registry::builder(test_config()).without_maintenance().start().unwrap();
    let payload = json!({
        "customer": {"name": "Ada Lovelace", "email": "ada@example.com"},
        "items": (0..50).map(|i| json!({"sku": format!("SKU-{}", i), "qty": i})).collect::<Vec<_>>(),
        "note": "Please deliver after 5pm"
    });

    let iterations = 2_000;
    let start = Instant::now();
    for _ in 0..iterations {
        assert!(registry.middleware().validate(&payload).is_clean());
    }
    let elapsed = start.elapsed();
    println!(
        "Validated {} payloads in {:?} ({:.0}/sec)",
        iterations,
        elapsed,
        iterations as f64 / elapsed.as_secs_f64()
    );
    registry.teardown().await;
}
