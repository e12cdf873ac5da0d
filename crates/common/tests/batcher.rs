//! Integration tests for the operation batcher

mod common;

use std::sync::Arc;
use std::time::Duration;

use ::common::engine::{Operation, OperationBatcher};
use ::common::fao::FaoError;
use serde_json::json;

use common::{BatchScript, ScriptedRemote};

fn batcher(remote: &Arc<ScriptedRemote>, max_batch: usize, flush_interval: Duration) -> OperationBatcher {
    OperationBatcher::new(
        remote.clone(),
        max_batch,
        flush_interval,
        Duration::from_secs(1),
    )
}

fn tagged(tag: &str) -> Operation {
    Operation::new("write").with("tag", tag)
}

#[tokio::test]
async fn test_results_fan_out_by_position() {
    let remote = Arc::new(ScriptedRemote::new(BatchScript::Echo));
    let batcher = batcher(&remote, 100, Duration::from_millis(20));

    let (a, b, c) = tokio::join!(
        batcher.enqueue(tagged("A"), None),
        batcher.enqueue(tagged("B"), None),
        batcher.enqueue(tagged("C"), None),
    );

    assert_eq!(a.unwrap()["tag"], json!("A"));
    assert_eq!(b.unwrap()["tag"], json!("B"));
    assert_eq!(c.unwrap()["tag"], json!("C"));
    assert_eq!(remote.batches(), vec![3]);
}

#[tokio::test]
async fn test_short_response_is_protocol_violation() {
    let remote = Arc::new(ScriptedRemote::new(BatchScript::Truncated(1)));
    let batcher = batcher(&remote, 100, Duration::from_millis(20));

    let (first, second) = tokio::join!(
        batcher.enqueue(tagged("A"), None),
        batcher.enqueue(tagged("B"), None),
    );

    assert_eq!(first.unwrap()["tag"], json!("A"));
    assert!(matches!(second, Err(FaoError::ProtocolViolation(_))));
}

#[tokio::test]
async fn test_failed_batch_fails_every_caller() {
    let remote = Arc::new(ScriptedRemote::new(BatchScript::Fail));
    let batcher = batcher(&remote, 100, Duration::from_millis(20));

    let (first, second) = tokio::join!(
        batcher.enqueue(tagged("A"), None),
        batcher.enqueue(tagged("B"), None),
    );

    assert!(matches!(first, Err(FaoError::Transport(_))));
    assert!(matches!(second, Err(FaoError::Transport(_))));
    // No retry.
    assert_eq!(remote.batches(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_batch_times_out() {
    let remote = Arc::new(ScriptedRemote::new(BatchScript::Stall(Duration::from_secs(30))));
    let batcher = batcher(&remote, 100, Duration::from_millis(20));

    let result = batcher.enqueue(tagged("A"), None).await;
    assert!(matches!(result, Err(FaoError::Timeout(d)) if d == Duration::from_secs(1)));
}

#[tokio::test]
async fn test_full_queue_flushes_without_waiting_for_tick() {
    let remote = Arc::new(ScriptedRemote::new(BatchScript::Echo));
    let batcher = OperationBatcher::new(
        remote.clone(),
        2,
        Duration::from_secs(3600),
        Duration::from_secs(5),
    );

    let results = tokio::time::timeout(
        Duration::from_secs(2),
        futures::future::join_all((0..6).map(|i| batcher.enqueue(tagged(&i.to_string()), None))),
    )
    .await
    .expect("full batches should flush immediately");

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap()["tag"], json!(i.to_string()));
    }
    let batches = remote.batches();
    assert_eq!(batches.iter().sum::<usize>(), 6);
    assert!(batches.iter().all(|size| *size <= 2));
}

#[tokio::test]
async fn test_shutdown_flushes_queued_operations() {
    let remote = Arc::new(ScriptedRemote::new(BatchScript::Echo));
    let batcher = OperationBatcher::new(
        remote.clone(),
        100,
        Duration::from_secs(3600),
        Duration::from_secs(5),
    );

    let pending = {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.enqueue(tagged("late"), None).await })
    };
    tokio::task::yield_now().await;

    batcher.shutdown().await;
    assert_eq!(pending.await.unwrap().unwrap()["tag"], json!("late"));

    let after = batcher.enqueue(tagged("too-late"), None).await;
    assert!(after.is_err());
}
