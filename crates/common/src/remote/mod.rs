//! The remote storage service, seen from the engine.
//!
//! [`RemoteStorage`] is the operation set the pipeline's innermost stage is
//! built on. The binary implements it over HTTP; [`MemRemote`] implements it
//! in memory for tests and offline mounts.

mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::engine::Operation;
use crate::fao::{ByteStream, NodeInfo, Result};

pub use memory::{CallCounts, MemRemote};

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Metadata for `path`, or `None` when the service has nothing there.
    async fn stat(&self, path: &str) -> Result<Option<NodeInfo>>;

    async fn read_dir(&self, path: &str) -> Result<Vec<NodeInfo>>;

    /// The whole body of the file at `path`.
    async fn read(&self, path: &str) -> Result<Bytes>;

    async fn read_stream(&self, path: &str) -> Result<ByteStream>;

    /// Run `operations` as one request. `blobs` are the payloads of the
    /// operations that carry one, in operation order. The result list is
    /// positional: entry `i` answers `operations[i]`, and a failed operation
    /// is reported as an object with an `error` field.
    async fn batch(&self, operations: Vec<Operation>, blobs: Vec<Bytes>) -> Result<Vec<Value>>;

    async fn symlink(&self, path: &str, target: &str) -> Result<NodeInfo>;

    /// Move `source` to `parent/name`.
    async fn move_to(&self, source: &str, parent: &str, name: &str) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;
}
