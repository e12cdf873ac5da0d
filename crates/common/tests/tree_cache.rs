//! Integration tests for the directory-tree cache stage

mod common;

use std::time::Duration;

use ::common::fao::FaoError;
use ::common::pipeline::Layer;
use ::common::remote::MemRemote;

fn tree_layers() -> Vec<Layer> {
    vec![Layer::LocalIds, Layer::TreeCache]
}

fn names(listing: &[::common::fao::NodeInfo]) -> Vec<String> {
    let mut names: Vec<_> = listing.iter().map(|info| info.name.clone()).collect();
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn test_listing_is_served_while_fresh() {
    let remote = MemRemote::new();
    remote.insert_file("/a.txt", "a");
    remote.insert_file("/b.txt", "b");
    let env = common::setup_test_env_with(remote, |_| {}).await;
    let fs = env.pipeline(tree_layers());

    let first = fs.read_dir("/").await.unwrap();
    let second = fs.read_dir("/").await.unwrap();
    assert_eq!(names(&first), vec!["a.txt", "b.txt"]);
    assert_eq!(names(&second), names(&first));
    assert_eq!(env.remote.calls().read_dir, 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    fs.read_dir("/").await.unwrap();
    assert_eq!(env.remote.calls().read_dir, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stat_after_listing_skips_remote() {
    let remote = MemRemote::new();
    remote.insert_file("/docs/readme.md", "hello");
    let env = common::setup_test_env_with(remote, |_| {}).await;
    let fs = env.pipeline(tree_layers());

    fs.read_dir("/").await.unwrap();
    let listing = fs.read_dir("/docs").await.unwrap();
    let stats_after_listing = env.remote.calls().stat;

    let info = fs.stat("/docs/readme.md").await.unwrap().unwrap();
    assert_eq!(info.size, 5);
    assert_eq!(info.local_id, listing[0].local_id);
    assert_eq!(env.remote.calls().stat, stats_after_listing);
}

#[tokio::test]
async fn test_concurrent_listing_refreshes_once() {
    let remote = MemRemote::new().with_latency(Duration::from_millis(20));
    remote.insert_file("/f", "x");
    let env = common::setup_test_env_with(remote, |_| {}).await;
    let fs = env.pipeline(tree_layers());

    let listings = futures::future::join_all((0..20).map(|_| fs.read_dir("/"))).await;
    for listing in listings {
        assert_eq!(names(&listing.unwrap()), vec!["f"]);
    }
    assert_eq!(env.remote.calls().read_dir, 1);
}

#[tokio::test]
async fn test_stat_of_missing_path() {
    let env = common::setup_test_env().await;
    let fs = env.pipeline(tree_layers());

    assert!(fs.stat("/nope").await.unwrap().is_none());
    let root = fs.stat("/").await.unwrap().unwrap();
    assert!(root.is_dir);
    assert!(matches!(
        fs.read_dir("/nope").await,
        Err(FaoError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_created_entries_are_visible_without_relisting() {
    let env = common::setup_test_env().await;
    let fs = env.pipeline(tree_layers());

    assert!(fs.read_dir("/").await.unwrap().is_empty());
    fs.create("/", "new.txt").await.unwrap();
    fs.mkdir("/", "dir").await.unwrap();
    fs.symlink("/", "link", "/new.txt").await.unwrap();

    let listing = fs.read_dir("/").await.unwrap();
    assert_eq!(names(&listing), vec!["dir", "link", "new.txt"]);
    assert_eq!(env.remote.calls().read_dir, 1);

    // The new directory is usable as a parent straight away.
    fs.create("/dir", "inner.txt").await.unwrap();
    assert!(env.remote.exists("/dir/inner.txt"));
}

#[tokio::test]
async fn test_mutation_under_unknown_parent_is_protocol_violation() {
    let remote = MemRemote::new();
    remote.insert_dir("/unseen");
    let env = common::setup_test_env_with(remote, |_| {}).await;
    let fs = env.pipeline(tree_layers());

    let result = fs.create("/unseen", "f.txt").await;
    assert!(matches!(result, Err(FaoError::ProtocolViolation(_))));
    // Nothing reached the remote.
    assert_eq!(env.remote.calls().batch, 0);
    assert!(!env.remote.exists("/unseen/f.txt"));
}

#[tokio::test]
async fn test_unlink_removes_entry() {
    let remote = MemRemote::new();
    remote.insert_file("/gone.txt", "bye");
    remote.insert_file("/kept.txt", "hi");
    let env = common::setup_test_env_with(remote, |_| {}).await;
    let fs = env.pipeline(tree_layers());

    fs.read_dir("/").await.unwrap();
    fs.unlink("/gone.txt").await.unwrap();

    assert_eq!(names(&fs.read_dir("/").await.unwrap()), vec!["kept.txt"]);
    assert!(fs.stat("/gone.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn test_move_relinks_subtree() {
    let remote = MemRemote::new();
    remote.insert_file("/src/nested/file.txt", "data");
    remote.insert_dir("/dest");
    let env = common::setup_test_env_with(remote, |_| {}).await;
    let fs = env.pipeline(tree_layers());

    fs.read_dir("/").await.unwrap();
    fs.read_dir("/src").await.unwrap();
    let nested = fs.stat("/src/nested").await.unwrap().unwrap();

    fs.mv("/src/nested", "/dest", "moved").await.unwrap();

    let stats_before = env.remote.calls().stat;
    let moved = fs.stat("/dest/moved").await.unwrap().unwrap();
    assert_eq!(moved.local_id, nested.local_id);
    assert_eq!(moved.path, "/dest/moved");
    assert_eq!(env.remote.calls().stat, stats_before);

    assert!(fs.stat("/src/nested").await.unwrap().is_none());
    assert!(fs.read_dir("/src").await.unwrap().is_empty());
    assert_eq!(
        names(&fs.read_dir("/dest/moved").await.unwrap()),
        vec!["file.txt"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_listing_refresh_waits_for_entry_lock() {
    let remote = MemRemote::new();
    remote.insert_file("/a.txt", "a");
    let env = common::setup_test_env_with(remote, |_| {}).await;
    let fs = env.pipeline(tree_layers());

    let child = fs.read_dir("/").await.unwrap().remove(0);
    tokio::time::advance(Duration::from_secs(6)).await;

    // While another caller holds the child's metadata lock, a refresh cannot
    // publish the child's path and metadata.
    let guard = env
        .engine
        .associations()
        .node_info()
        .set_and_lock(child.local_id.clone(), child.clone(), Duration::from_secs(60))
        .await;
    let blocked = tokio::time::timeout(Duration::from_millis(100), fs.read_dir("/")).await;
    assert!(blocked.is_err());

    drop(guard);
    let listing = fs.read_dir("/").await.unwrap();
    assert_eq!(listing[0].local_id, child.local_id);
    assert_eq!(
        env.engine.associations().local_for_path("/a.txt"),
        Some(child.local_id.clone())
    );
    let cached = env
        .engine
        .associations()
        .node_info()
        .get(&child.local_id)
        .unwrap();
    assert_eq!(cached.path, "/a.txt");
}
