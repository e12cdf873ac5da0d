use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::{json, Value};
use uuid::Uuid;

use super::RemoteStorage;
use crate::engine::Operation;
use crate::fao::{path, ByteStream, FaoError, NodeInfo, Result};

/// How many times each remote operation has been called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub stat: usize,
    pub read_dir: usize,
    pub read: usize,
    pub batch: usize,
    /// Operations carried across all batch calls.
    pub batched_operations: usize,
    pub symlink: usize,
    pub move_to: usize,
    pub delete: usize,
}

#[derive(Debug, Default)]
struct Counters {
    stat: AtomicUsize,
    read_dir: AtomicUsize,
    read: AtomicUsize,
    batch: AtomicUsize,
    batched_operations: AtomicUsize,
    symlink: AtomicUsize,
    move_to: AtomicUsize,
    delete: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

#[derive(Debug, Clone)]
struct MemNode {
    info: NodeInfo,
    data: Bytes,
}

/// An in-memory stand-in for the remote storage service.
///
/// Nodes are keyed by their absolute path. Every call can be slowed down by
/// a fixed latency, and every call is counted so tests can assert how much
/// traffic the caches let through.
#[derive(Debug)]
pub struct MemRemote {
    nodes: RwLock<BTreeMap<String, MemNode>>,
    counters: Counters,
    latency: Option<Duration>,
}

impl MemRemote {
    pub fn new() -> Self {
        let mut root = new_info("/", true);
        root.name = String::new();

        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            MemNode {
                info: root,
                data: Bytes::new(),
            },
        );

        Self {
            nodes: RwLock::new(nodes),
            counters: Counters::default(),
            latency: None,
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add or replace a file, creating missing parent directories.
    pub fn insert_file(&self, file_path: &str, data: impl Into<Bytes>) -> NodeInfo {
        let file_path = path::clean(file_path);
        let data = data.into();
        let mut nodes = self.nodes.write();
        ensure_dirs(&mut nodes, &path::parent(&file_path));

        let mut info = new_info(&file_path, false);
        info.size = data.len() as u64;
        nodes.insert(
            file_path,
            MemNode {
                info: info.clone(),
                data,
            },
        );
        info
    }

    /// Add a directory and any missing parents.
    pub fn insert_dir(&self, dir_path: &str) -> NodeInfo {
        let dir_path = path::clean(dir_path);
        let mut nodes = self.nodes.write();
        ensure_dirs(&mut nodes, &dir_path);
        nodes
            .get(&dir_path)
            .map(|node| node.info.clone())
            .unwrap_or_default()
    }

    /// Current contents of the file at `file_path`.
    pub fn contents(&self, file_path: &str) -> Option<Bytes> {
        self.nodes
            .read()
            .get(file_path)
            .filter(|node| !node.info.is_dir)
            .map(|node| node.data.clone())
    }

    pub fn exists(&self, node_path: &str) -> bool {
        self.nodes.read().contains_key(node_path)
    }

    pub fn root_id(&self) -> String {
        self.nodes
            .read()
            .get("/")
            .map(|node| node.info.remote_id.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            stat: c.stat.load(Ordering::SeqCst),
            read_dir: c.read_dir.load(Ordering::SeqCst),
            read: c.read.load(Ordering::SeqCst),
            batch: c.batch.load(Ordering::SeqCst),
            batched_operations: c.batched_operations.load(Ordering::SeqCst),
            symlink: c.symlink.load(Ordering::SeqCst),
            move_to: c.move_to.load(Ordering::SeqCst),
            delete: c.delete.load(Ordering::SeqCst),
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn file(&self, file_path: &str) -> Result<MemNode> {
        let nodes = self.nodes.read();
        let node = nodes
            .get(file_path)
            .ok_or_else(|| FaoError::NotFound(file_path.to_string()))?;
        if node.info.is_dir {
            return Err(FaoError::IsADirectory(file_path.to_string()));
        }
        Ok(node.clone())
    }

    fn run_operation(&self, operation: &Operation, blobs: &mut impl Iterator<Item = Bytes>) -> Value {
        let outcome = match operation.op() {
            Some("write") => {
                let blob = blobs.next();
                self.apply_write(operation, blob)
            }
            Some("mkdir") => self.apply_mkdir(operation),
            Some("symlink") => self.apply_symlink(operation),
            other => Err(("unknown_operation", format!("unsupported operation {:?}", other))),
        };

        match outcome {
            Ok(info) => serde_json::to_value(&info).unwrap_or(Value::Null),
            Err((code, message)) => json!({ "error": { "code": code, "message": message } }),
        }
    }

    fn apply_write(
        &self,
        operation: &Operation,
        blob: Option<Bytes>,
    ) -> std::result::Result<NodeInfo, (&'static str, String)> {
        let parent = required(operation, "path")?;
        let name = required(operation, "name")?;
        let overwrite = operation
            .get("overwrite")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let data = blob.ok_or(("missing_file", "write without a file part".to_string()))?;

        let target = path::join(parent, name);
        let mut nodes = self.nodes.write();
        check_parent(&nodes, parent)?;
        if let Some(existing) = nodes.get(&target) {
            if existing.info.is_dir || !overwrite {
                return Err(("item_with_same_name_exists", target));
            }
        }

        let mut info = match nodes.get(&target) {
            Some(existing) => existing.info.clone(),
            None => new_info(&target, false),
        };
        info.size = data.len() as u64;
        info.modified = now();
        nodes.insert(
            target,
            MemNode {
                info: info.clone(),
                data,
            },
        );
        Ok(info)
    }

    fn apply_mkdir(&self, operation: &Operation) -> std::result::Result<NodeInfo, (&'static str, String)> {
        let parent = required(operation, "parent")?;
        let name = required(operation, "path")?;

        let target = path::join(parent, name);
        let mut nodes = self.nodes.write();
        check_parent(&nodes, parent)?;
        if nodes.contains_key(&target) {
            return Err(("item_with_same_name_exists", target));
        }

        let info = new_info(&target, true);
        nodes.insert(
            target,
            MemNode {
                info: info.clone(),
                data: Bytes::new(),
            },
        );
        Ok(info)
    }

    fn apply_symlink(&self, operation: &Operation) -> std::result::Result<NodeInfo, (&'static str, String)> {
        let parent = required(operation, "path")?;
        let name = required(operation, "name")?;
        let target = required(operation, "target")?;

        let link = path::join(parent, name);
        let mut nodes = self.nodes.write();
        check_parent(&nodes, parent)?;
        if nodes.contains_key(&link) {
            return Err(("item_with_same_name_exists", link));
        }

        let mut info = new_info(&link, false);
        info.is_symlink = true;
        info.symlink_path = Some(target.to_string());
        nodes.insert(
            link,
            MemNode {
                info: info.clone(),
                data: Bytes::new(),
            },
        );
        Ok(info)
    }
}

impl Default for MemRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStorage for MemRemote {
    async fn stat(&self, node_path: &str) -> Result<Option<NodeInfo>> {
        bump(&self.counters.stat);
        self.delay().await;
        Ok(self.nodes.read().get(node_path).map(|node| node.info.clone()))
    }

    async fn read_dir(&self, dir_path: &str) -> Result<Vec<NodeInfo>> {
        bump(&self.counters.read_dir);
        self.delay().await;

        let nodes = self.nodes.read();
        let dir = nodes
            .get(dir_path)
            .ok_or_else(|| FaoError::NotFound(dir_path.to_string()))?;
        if !dir.info.is_dir {
            return Err(FaoError::NotADirectory(dir_path.to_string()));
        }

        Ok(nodes
            .iter()
            .filter(|(candidate, _)| *candidate != "/" && path::parent(candidate) == dir_path)
            .map(|(_, node)| node.info.clone())
            .collect())
    }

    async fn read(&self, file_path: &str) -> Result<Bytes> {
        bump(&self.counters.read);
        self.delay().await;
        Ok(self.file(file_path)?.data)
    }

    async fn read_stream(&self, file_path: &str) -> Result<ByteStream> {
        bump(&self.counters.read);
        self.delay().await;
        let data = self.file(file_path)?.data;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn batch(&self, operations: Vec<Operation>, blobs: Vec<Bytes>) -> Result<Vec<Value>> {
        bump(&self.counters.batch);
        self.counters
            .batched_operations
            .fetch_add(operations.len(), Ordering::SeqCst);
        self.delay().await;

        let mut blobs = blobs.into_iter();
        Ok(operations
            .iter()
            .map(|operation| self.run_operation(operation, &mut blobs))
            .collect())
    }

    async fn symlink(&self, link_path: &str, target: &str) -> Result<NodeInfo> {
        bump(&self.counters.symlink);
        self.delay().await;

        let operation = Operation::symlink(
            &path::parent(link_path),
            &path::base_name(link_path),
            target,
        );
        self.apply_symlink(&operation).map_err(|(code, message)| match code {
            "item_with_same_name_exists" => FaoError::AlreadyExists(message),
            "not_found" => FaoError::NotFound(message),
            _ => FaoError::Transport(message),
        })
    }

    async fn move_to(&self, source: &str, parent: &str, name: &str) -> Result<()> {
        bump(&self.counters.move_to);
        self.delay().await;

        let destination = path::join(parent, name);
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(source) {
            return Err(FaoError::NotFound(source.to_string()));
        }
        match nodes.get(parent) {
            Some(node) if node.info.is_dir => {}
            Some(_) => return Err(FaoError::NotADirectory(parent.to_string())),
            None => return Err(FaoError::NotFound(parent.to_string())),
        }
        if source == destination {
            return Ok(());
        }
        if path::is_within(&destination, source) {
            return Err(FaoError::Transport(format!(
                "cannot move {} into itself",
                source
            )));
        }

        nodes.retain(|candidate, _| !path::is_within(candidate, &destination));
        let moved: Vec<String> = nodes
            .keys()
            .filter(|candidate| path::is_within(candidate, source))
            .cloned()
            .collect();
        for old in moved {
            if let Some(mut node) = nodes.remove(&old) {
                let new_path = path::rebase(&old, source, &destination);
                node.info.name = path::base_name(&new_path);
                node.info.path = new_path.clone();
                nodes.insert(new_path, node);
            }
        }
        Ok(())
    }

    async fn delete(&self, node_path: &str) -> Result<()> {
        bump(&self.counters.delete);
        self.delay().await;

        let mut nodes = self.nodes.write();
        if node_path == "/" || !nodes.contains_key(node_path) {
            return Err(FaoError::NotFound(node_path.to_string()));
        }
        nodes.retain(|candidate, _| !path::is_within(candidate, node_path));
        Ok(())
    }
}

fn now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn new_info(node_path: &str, is_dir: bool) -> NodeInfo {
    let remote_id = Uuid::new_v4().to_string();
    let stamp = now();
    NodeInfo {
        path: node_path.to_string(),
        name: path::base_name(node_path),
        id: remote_id.clone(),
        remote_id,
        is_dir,
        modified: stamp,
        created: stamp,
        accessed: stamp,
        ..Default::default()
    }
}

fn ensure_dirs(nodes: &mut BTreeMap<String, MemNode>, dir_path: &str) {
    if nodes.contains_key(dir_path) {
        return;
    }
    ensure_dirs(nodes, &path::parent(dir_path));
    nodes.insert(
        dir_path.to_string(),
        MemNode {
            info: new_info(dir_path, true),
            data: Bytes::new(),
        },
    );
}

fn required<'a>(
    operation: &'a Operation,
    key: &str,
) -> std::result::Result<&'a str, (&'static str, String)> {
    operation
        .get_str(key)
        .ok_or(("field_missing", format!("operation is missing {:?}", key)))
}

fn check_parent(
    nodes: &BTreeMap<String, MemNode>,
    parent: &str,
) -> std::result::Result<(), (&'static str, String)> {
    match nodes.get(parent) {
        Some(node) if node.info.is_dir => Ok(()),
        Some(_) => Err(("dest_is_not_a_directory", parent.to_string())),
        None => Err(("subject_does_not_exist", parent.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_batch_write_and_mkdir() {
        let remote = MemRemote::new();
        let results = remote
            .batch(
                vec![
                    Operation::mkdir("/", "docs"),
                    Operation::write("/docs", "a.txt", true),
                    Operation::write("/missing", "b.txt", true),
                ],
                vec![Bytes::from_static(b"hello"), Bytes::from_static(b"lost")],
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["is_dir"], json!(true));
        assert_eq!(results[1]["path"], json!("/docs/a.txt"));
        assert_eq!(results[1]["size"], json!(5));
        assert_eq!(results[2]["error"]["code"], json!("subject_does_not_exist"));
        assert_eq!(remote.contents("/docs/a.txt").unwrap(), "hello");

        let calls = remote.calls();
        assert_eq!(calls.batch, 1);
        assert_eq!(calls.batched_operations, 3);
    }

    #[tokio::test]
    async fn test_read_dir_lists_direct_children() {
        let remote = MemRemote::new();
        remote.insert_file("/a/b/c.txt", "c");
        remote.insert_file("/a/d.txt", "d");

        let mut names: Vec<_> = remote
            .read_dir("/a")
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["b", "d.txt"]);

        assert!(matches!(
            remote.read_dir("/a/d.txt").await,
            Err(FaoError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_move_rebases_subtree() {
        let remote = MemRemote::new();
        remote.insert_file("/a/b/c.txt", "c");
        remote.insert_dir("/z");

        remote.move_to("/a", "/z", "moved").await.unwrap();

        assert!(!remote.exists("/a"));
        assert_eq!(remote.contents("/z/moved/b/c.txt").unwrap(), "c");
        let info = remote.stat("/z/moved/b").await.unwrap().unwrap();
        assert_eq!(info.name, "b");
        assert_eq!(info.path, "/z/moved/b");
    }

    #[tokio::test]
    async fn test_read_stream_and_delete() {
        let remote = MemRemote::new();
        remote.insert_file("/f", "body");

        let mut stream = remote.read_stream("/f").await.unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "body");

        remote.delete("/f").await.unwrap();
        assert!(remote.stat("/f").await.unwrap().is_none());
        assert!(matches!(
            remote.delete("/f").await,
            Err(FaoError::NotFound(_))
        ));
    }
}
