use std::sync::Arc;

use async_trait::async_trait;

use crate::fao::{path, ByteStream, FsOps, NodeInfo, Result};

/// Normalizes every path argument before it reaches the caches, so
/// `/a//b/`, `/a/./b` and `/a/b` share one cache entry.
pub struct CleanPathFao {
    delegate: Arc<dyn FsOps>,
}

impl CleanPathFao {
    pub fn new(delegate: Arc<dyn FsOps>) -> Self {
        Self { delegate }
    }
}

#[async_trait]
impl FsOps for CleanPathFao {
    async fn stat(&self, p: &str) -> Result<Option<NodeInfo>> {
        self.delegate.stat(&path::clean(p)).await
    }

    async fn read_dir(&self, p: &str) -> Result<Vec<NodeInfo>> {
        self.delegate.read_dir(&path::clean(p)).await
    }

    async fn read(&self, p: &str, dest: &mut [u8], offset: u64) -> Result<usize> {
        self.delegate.read(&path::clean(p), dest, offset).await
    }

    async fn write(&self, p: &str, src: &[u8], offset: u64) -> Result<usize> {
        self.delegate.write(&path::clean(p), src, offset).await
    }

    async fn create(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        self.delegate.create(&path::clean(parent), name).await
    }

    async fn truncate(&self, p: &str, size: u64) -> Result<()> {
        self.delegate.truncate(&path::clean(p), size).await
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        self.delegate.mkdir(&path::clean(parent), name).await
    }

    async fn symlink(&self, parent: &str, name: &str, target: &str) -> Result<NodeInfo> {
        self.delegate
            .symlink(&path::clean(parent), name, target)
            .await
    }

    async fn unlink(&self, p: &str) -> Result<()> {
        self.delegate.unlink(&path::clean(p)).await
    }

    async fn mv(&self, source: &str, parent: &str, name: &str) -> Result<()> {
        self.delegate
            .mv(&path::clean(source), &path::clean(parent), name)
            .await
    }

    async fn read_all(&self, p: &str) -> Result<ByteStream> {
        self.delegate.read_all(&path::clean(p)).await
    }
}
