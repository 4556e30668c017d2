//! Integration tests for the executor's global CPU gate
//!
//! Run with: cargo test --test executor_gate_test

use remuxa::command::TransformOp;
use remuxa::error::TransformError;
use remuxa::executor;
use remuxa::status::StatusRegistry;
use remuxa::task::TaskContext;
use serial_test::serial;
use std::time::Duration;

// The gate is process-wide, so everything touching it runs serialized.

#[tokio::test]
#[serial]
async fn test_gate_admits_one_holder_at_a_time() {
    // default capacity is one slot
    let first = executor::acquire_cpu_slot().await.unwrap();

    let blocked = tokio::time::timeout(Duration::from_millis(50), executor::acquire_cpu_slot()).await;
    assert!(blocked.is_err(), "second acquisition should block while the slot is held");

    drop(first);
    let second = tokio::time::timeout(Duration::from_millis(500), executor::acquire_cpu_slot()).await;
    assert!(second.is_ok(), "dropping the permit must release the slot");
}

#[tokio::test]
#[serial]
async fn test_waiters_are_admitted_in_turn() {
    let permit = executor::acquire_cpu_slot().await.unwrap();

    let waiter = tokio::spawn(async {
        let _slot = executor::acquire_cpu_slot().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(permit);
    tokio::time::timeout(Duration::from_millis(500), waiter)
        .await
        .expect("waiter should finish once the slot frees")
        .unwrap();
}

#[tokio::test]
#[serial]
async fn test_cancelled_batch_never_takes_the_slot() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("movie.mkv"), b"x").unwrap();

    let ctx = TaskContext::new(1, 10, 500, "movie.mkv");
    ctx.cancel();

    let statuses = StatusRegistry::new();
    let result = executor::run_batch(&ctx, dir.path(), &TransformOp::RemoveAudio { indices: vec![0] }, &statuses).await;
    assert!(matches!(result, Err(TransformError::Cancelled)));
    assert!(statuses.is_empty());

    // the slot is still free for the next taker
    let slot = tokio::time::timeout(Duration::from_millis(100), executor::acquire_cpu_slot()).await;
    assert!(slot.is_ok());
}
