//! The filesystem-operations interface.
//!
//! Every stage of the pipeline both implements [`FsOps`] and wraps a
//! delegate implementing it, so caches can be stacked in any order and
//! tested without the FUSE binding or the network.

mod error;
mod node;
pub mod path;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use error::{FaoError, Result};
pub use node::NodeInfo;

/// A streamed file body.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait FsOps: Send + Sync {
    /// Metadata for `path`, or `None` when nothing exists there.
    async fn stat(&self, path: &str) -> Result<Option<NodeInfo>>;

    async fn read_dir(&self, path: &str) -> Result<Vec<NodeInfo>>;

    /// Fill `dest` with bytes starting at `offset`. Returns how many bytes
    /// were filled; reads at or past the end of the file return 0.
    async fn read(&self, path: &str, dest: &mut [u8], offset: u64) -> Result<usize>;

    async fn write(&self, path: &str, src: &[u8], offset: u64) -> Result<usize>;

    async fn create(&self, parent: &str, name: &str) -> Result<NodeInfo>;

    async fn truncate(&self, path: &str, size: u64) -> Result<()>;

    async fn mkdir(&self, parent: &str, name: &str) -> Result<NodeInfo>;

    async fn symlink(&self, parent: &str, name: &str, target: &str) -> Result<NodeInfo>;

    async fn unlink(&self, path: &str) -> Result<()>;

    /// Move `source` to `parent/name`.
    async fn mv(&self, source: &str, parent: &str, name: &str) -> Result<()>;

    async fn read_all(&self, path: &str) -> Result<ByteStream>;
}
