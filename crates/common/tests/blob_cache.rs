//! Integration tests for the content blob cache

use std::time::Duration;

use ::common::engine::{BlobCache, Signal};
use tempfile::TempDir;

async fn wait(signal: Signal) {
    tokio::time::timeout(Duration::from_secs(5), signal.wait())
        .await
        .expect("signal should fire");
}

#[tokio::test]
async fn test_entry_survives_until_last_reference() {
    let temp = TempDir::new().unwrap();
    let cache = BlobCache::new(temp.path());

    let first = cache.store(&b"shared content"[..]).await.unwrap();
    let hash = first.hash().to_string();
    let second = cache.hold(&hash).unwrap();
    let third = cache.hold(&hash).unwrap();

    first.release();
    second.release();
    let extra = cache.hold(&hash).expect("one live reference keeps the entry");
    drop(extra);

    let mut buf = [0u8; 6];
    assert_eq!(cache.get_bytes(&hash, 7, &mut buf).await.unwrap(), Some(6));
    assert_eq!(&buf, b"conten");

    let forgotten = third.forgotten();
    let evicted = third.evicted();
    third.release();

    wait(forgotten).await;
    assert!(cache.hold(&hash).is_none());
    wait(evicted).await;
    assert!(!cache.blob_path(&hash).exists());
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let cache = BlobCache::new(temp.path());

    let reference = cache.store(&b"once"[..]).await.unwrap();
    let other = cache.hold(reference.hash()).unwrap();

    reference.release();
    reference.release();
    assert!(cache.contains(reference.hash()));

    let evicted = other.evicted();
    other.release();
    wait(evicted.clone()).await;

    // Releasing after teardown is a no-op and does not re-fire anything.
    other.release();
    reference.release();
    assert!(evicted.is_fired());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_same_content_shares_one_file() {
    let temp = TempDir::new().unwrap();
    let cache = BlobCache::new(temp.path());

    let a = cache.store(&b"same"[..]).await.unwrap();
    let b = cache.store(&b"same"[..]).await.unwrap();
    let c = cache.store(&b"different"[..]).await.unwrap();

    assert_eq!(a.hash(), b.hash());
    assert_ne!(a.hash(), c.hash());
    assert_eq!(cache.len(), 2);

    let leftovers: Vec<_> = std::fs::read_dir(temp.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftovers.is_empty());
}
