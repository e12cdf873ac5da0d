//! Shared test utilities for engine and pipeline integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

use common::engine::{Engine, EngineConfig, Operation};
use common::fao::{ByteStream, FaoError, FsOps, NodeInfo, Result};
use common::pipeline::{Layer, Pipeline};
use common::remote::{MemRemote, RemoteStorage};

pub struct TestEnv {
    pub engine: Engine,
    pub remote: Arc<MemRemote>,
    pub temp: TempDir,
}

/// Engine settings with short intervals so tests finish quickly.
pub fn test_config(temp: &TempDir) -> EngineConfig {
    EngineConfig {
        tree_ttl: Duration::from_secs(5),
        read_ttl: Duration::from_secs(5),
        max_batch: 100,
        flush_interval: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
        cache_dir: temp.path().join("blobs"),
    }
}

/// Route engine logs to the test harness; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Set up an engine over a fresh in-memory remote
pub async fn setup_test_env() -> TestEnv {
    setup_test_env_with(MemRemote::new(), |_| {}).await
}

/// Set up an engine over `remote`, letting the caller adjust the config
pub async fn setup_test_env_with(
    remote: MemRemote,
    configure: impl FnOnce(&mut EngineConfig),
) -> TestEnv {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp);
    configure(&mut config);

    let remote = Arc::new(remote);
    let engine = Engine::new(config, remote.clone());
    TestEnv {
        engine,
        remote,
        temp,
    }
}

impl TestEnv {
    /// Build a pipeline over the remote with the given layers, innermost first
    pub fn pipeline(&self, layers: Vec<Layer>) -> Arc<dyn FsOps> {
        Pipeline::remote(&self.engine).with_layers(layers).build()
    }
}

/// What a [`ScriptedRemote`] does with a batch.
#[derive(Debug, Clone)]
pub enum BatchScript {
    /// Answer every operation with the operation itself.
    Echo,
    /// Echo, but only the first `n` operations.
    Truncated(usize),
    /// Fail the whole request.
    Fail,
    /// Sleep this long before echoing.
    Stall(Duration),
}

/// A remote that only understands batches, for exercising the batcher.
pub struct ScriptedRemote {
    script: BatchScript,
    batches: Mutex<Vec<usize>>,
}

impl ScriptedRemote {
    pub fn new(script: BatchScript) -> Self {
        Self {
            script,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Sizes of the batches received so far, in order.
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().clone()
    }
}

fn echo(operations: Vec<Operation>) -> Vec<Value> {
    operations
        .into_iter()
        .map(|operation| Value::Object(operation.into_map()))
        .collect()
}

#[async_trait]
impl RemoteStorage for ScriptedRemote {
    async fn stat(&self, _path: &str) -> Result<Option<NodeInfo>> {
        Ok(None)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<NodeInfo>> {
        Err(FaoError::NotFound(path.to_string()))
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        Err(FaoError::NotFound(path.to_string()))
    }

    async fn read_stream(&self, path: &str) -> Result<ByteStream> {
        Err(FaoError::NotFound(path.to_string()))
    }

    async fn batch(&self, operations: Vec<Operation>, _blobs: Vec<Bytes>) -> Result<Vec<Value>> {
        self.batches.lock().push(operations.len());
        match &self.script {
            BatchScript::Echo => Ok(echo(operations)),
            BatchScript::Truncated(n) => Ok(echo(operations.into_iter().take(*n).collect())),
            BatchScript::Fail => Err(FaoError::Transport("service unavailable".into())),
            BatchScript::Stall(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(echo(operations))
            }
        }
    }

    async fn symlink(&self, path: &str, _target: &str) -> Result<NodeInfo> {
        Err(FaoError::NotFound(path.to_string()))
    }

    async fn move_to(&self, source: &str, _parent: &str, _name: &str) -> Result<()> {
        Err(FaoError::NotFound(source.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        Err(FaoError::NotFound(path.to_string()))
    }
}

/// Read a whole file through `fs` in one call.
pub async fn read_to_string(fs: &Arc<dyn FsOps>, path: &str, len: usize) -> String {
    let mut buf = vec![0u8; len];
    let n = fs.read(path, &mut buf, 0).await.unwrap();
    buf.truncate(n);
    String::from_utf8(buf).unwrap()
}
