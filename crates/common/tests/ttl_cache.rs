//! Integration tests for the stampede-protected TTL cache

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::common::engine::TtlCache;
use ::common::fao::FaoError;

#[tokio::test]
async fn test_concurrent_misses_run_factory_once() {
    let cache: Arc<TtlCache<String, u64>> = Arc::new(TtlCache::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_set("key", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, FaoError>(Some(42))
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap(), Some(42));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_repopulated_once() {
    let cache: TtlCache<String, usize> = TtlCache::new();
    let counter = AtomicUsize::new(0);
    let calls = &counter;
    let ttl = Duration::from_secs(5);

    let fetch = move || async move {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok::<_, FaoError>(Some(n))
    };

    assert_eq!(cache.get_or_set("k", ttl, fetch).await.unwrap(), Some(1));

    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(cache.get_or_set("k", ttl, fetch).await.unwrap(), Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.get_or_set("k", ttl, fetch).await.unwrap(), Some(2));
    assert_eq!(cache.get_or_set("k", ttl, fetch).await.unwrap(), Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_absent_result_is_not_cached() {
    let cache: TtlCache<String, u8> = TtlCache::new();

    let missing = cache
        .get_or_set("k", Duration::ZERO, || async { Ok::<_, FaoError>(None) })
        .await
        .unwrap();
    assert!(missing.is_none());
    assert!(cache.is_empty());

    let found = cache
        .get_or_set("k", Duration::ZERO, || async { Ok::<_, FaoError>(Some(7)) })
        .await
        .unwrap();
    assert_eq!(found, Some(7));
}

#[tokio::test]
async fn test_factory_error_is_returned_and_not_cached() {
    let cache: TtlCache<String, u8> = TtlCache::new();

    let result = cache
        .get_or_set("k", Duration::ZERO, || async {
            Err::<Option<u8>, _>(FaoError::Transport("down".into()))
        })
        .await;
    assert!(matches!(result, Err(FaoError::Transport(_))));
    assert!(cache.get("k").is_none());
}

#[tokio::test]
async fn test_set_and_lock_holds_off_populators() {
    let cache: Arc<TtlCache<String, &'static str>> = Arc::new(TtlCache::new());
    let guard = cache
        .set_and_lock("k".to_string(), "eager", Duration::from_secs(60))
        .await;

    let waiter = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache.remove("k");
            cache
                .get_or_set("k", Duration::from_secs(60), || async {
                    Ok::<_, FaoError>(Some("factory"))
                })
                .await
                .unwrap()
        })
    };

    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());
    cache.set("k".to_string(), "eager", Duration::from_secs(60));
    drop(guard);

    assert_eq!(waiter.await.unwrap(), Some("eager"));
}
