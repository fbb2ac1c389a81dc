//! Integration tests for the worker pool
//!
//! Faults and hangs are injected through custom job runners so the pool's
//! supervision can be observed without relying on real rule behavior.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use ruleforge_engine::{
    execute_payload, JobPayload, MetaData, PoolConfig, RuleError, RuleId, RuleRegistry,
    WorkerPool, WorkerState,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn registry() -> Arc<RuleRegistry> {
    Arc::new(RuleRegistry::standard().unwrap())
}

fn config(pool_size: usize, queue_depth: usize) -> PoolConfig {
    PoolConfig {
        pool_size,
        queue_depth,
        job_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(2),
    }
}

fn input_of(bytes: &[u8]) -> serde_json::Value {
    JobPayload::decode(bytes).unwrap().input_data
}

/// Panics on the input "boom", otherwise behaves normally
fn panicking_runner(bytes: &[u8]) -> Vec<u8> {
    if input_of(bytes) == json!("boom") {
        panic!("injected worker crash");
    }
    execute_payload(bytes)
}

/// Never answers in time for the input "hang"
fn hanging_runner(bytes: &[u8]) -> Vec<u8> {
    if input_of(bytes) == json!("hang") {
        std::thread::sleep(Duration::from_millis(1500));
    }
    execute_payload(bytes)
}

/// Takes a while for every job
fn slow_runner(bytes: &[u8]) -> Vec<u8> {
    std::thread::sleep(Duration::from_millis(150));
    execute_payload(bytes)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_queue_rejects_with_saturation() {
    let pool = WorkerPool::start_with_runner(registry(), config(1, 1), slow_runner).unwrap();

    let running = pool.enqueue(RuleId::Double, json!(1), &MetaData::Empty).unwrap();
    let queued = pool.enqueue(RuleId::Double, json!(2), &MetaData::Empty).unwrap();
    assert!(!pool.has_capacity());

    let rejected = pool.enqueue(RuleId::Double, json!(3), &MetaData::Empty);
    assert!(matches!(rejected, Err(RuleError::PoolSaturated { queue_depth: 1 })));

    // Admitted jobs still complete in order
    assert_eq!(running.wait().await.unwrap().value, json!(2));
    assert_eq!(queued.wait().await.unwrap().value, json!(4));

    let stats = pool.stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.saturated, 1);
    assert_eq!(stats.completed, 2);
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crash_does_not_affect_concurrent_job() {
    let pool = WorkerPool::start_with_runner(registry(), config(2, 4), panicking_runner).unwrap();

    let (crashed, healthy) = tokio::join!(
        pool.submit(RuleId::TrimWhitespace, json!("boom"), &MetaData::Empty),
        pool.submit(RuleId::Sum, json!([1, 2, 3]), &MetaData::Empty)
    );

    assert!(matches!(crashed, Err(RuleError::WorkerFault { .. })));
    assert_eq!(healthy.unwrap().value, json!(6));

    let stats = pool.stats();
    assert_eq!(stats.faulted, 1);
    assert_eq!(stats.replaced, 1);

    let workers = pool.workers();
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|w| w.state == WorkerState::Idle));
    assert!(workers.iter().any(|w| w.worker_id >= 2));

    // The replacement serves new work
    let after = pool.submit(RuleId::ToUpperCase, json!("ok"), &MetaData::Empty).await.unwrap();
    assert_eq!(after.value, json!("OK"));
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_replaces_wedged_worker() {
    let config = PoolConfig {
        job_timeout: Duration::from_millis(100),
        ..config(1, 4)
    };
    let pool = WorkerPool::start_with_runner(registry(), config, hanging_runner).unwrap();

    let err = pool
        .submit(RuleId::TrimWhitespace, json!("hang"), &MetaData::Empty)
        .await
        .unwrap_err();
    assert!(matches!(err, RuleError::JobTimeout { timeout_ms: 100, .. }));

    let next = pool.submit(RuleId::Double, json!(4), &MetaData::Empty).await.unwrap();
    assert_eq!(next.value, json!(8));
    assert_eq!(next.worker_id, 1);

    let stats = pool.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.replaced, 1);
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queued_job_waits_for_replacement() {
    let config = PoolConfig {
        job_timeout: Duration::from_millis(100),
        ..config(1, 4)
    };
    let pool = WorkerPool::start_with_runner(registry(), config, hanging_runner).unwrap();

    let wedged = pool.enqueue(RuleId::TrimWhitespace, json!("hang"), &MetaData::Empty).unwrap();
    let queued = pool.enqueue(RuleId::Double, json!(10), &MetaData::Empty).unwrap();

    assert!(matches!(wedged.wait().await, Err(RuleError::JobTimeout { .. })));
    let result = queued.wait().await.unwrap();
    assert_eq!(result.value, json!(20));
    assert_eq!(result.worker_id, 1);
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_for_capacity() {
    let pool = WorkerPool::start_with_runner(registry(), config(1, 0), slow_runner).unwrap();

    let ticket = pool.enqueue(RuleId::Double, json!(1), &MetaData::Empty).unwrap();
    assert!(!pool.has_capacity());
    assert!(!pool.wait_for_capacity(Duration::from_millis(10)).await);
    assert!(pool.wait_for_capacity(Duration::from_secs(2)).await);

    ticket.wait().await.unwrap();
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drains_in_flight_jobs() {
    let pool = WorkerPool::start_with_runner(registry(), config(1, 4), slow_runner).unwrap();

    let first = pool.enqueue(RuleId::Double, json!(1), &MetaData::Empty).unwrap();
    let second = pool.enqueue(RuleId::Double, json!(2), &MetaData::Empty).unwrap();

    pool.shutdown().await;
    assert_eq!(first.wait().await.unwrap().value, json!(2));
    assert_eq!(second.wait().await.unwrap().value, json!(4));

    let rejected = pool.enqueue(RuleId::Double, json!(3), &MetaData::Empty);
    assert!(matches!(rejected, Err(RuleError::PoolClosed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_grace_rejects_leftover_queue() {
    let config = PoolConfig {
        shutdown_grace: Duration::from_millis(20),
        ..config(1, 4)
    };
    let pool = WorkerPool::start_with_runner(registry(), config, slow_runner).unwrap();

    let running = pool.enqueue(RuleId::Double, json!(1), &MetaData::Empty).unwrap();
    let waiting = pool.enqueue(RuleId::Double, json!(2), &MetaData::Empty).unwrap();

    pool.shutdown().await;
    assert!(matches!(waiting.wait().await, Err(RuleError::PoolClosed)));
    // The job already on a worker still reports its own result
    assert_eq!(running.wait().await.unwrap().value, json!(2));
}
