use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{AssociationRegistry, ROOT_ID};
use crate::fao::{ByteStream, FsOps, NodeInfo, Result};

/// Stamps every node passing through with the local id of its remote id.
pub struct LocalIdFao {
    delegate: Arc<dyn FsOps>,
    associations: Arc<AssociationRegistry>,
}

impl LocalIdFao {
    pub fn new(delegate: Arc<dyn FsOps>, associations: Arc<AssociationRegistry>) -> Self {
        Self {
            delegate,
            associations,
        }
    }

    fn assign(&self, mut info: NodeInfo) -> NodeInfo {
        if info.path == "/" {
            if !info.remote_id.is_empty() {
                self.associations.bind_root(&info.remote_id);
            }
            info.local_id = ROOT_ID.to_string();
        } else if info.remote_id.is_empty() {
            tracing::warn!(path = %info.path, "remote node has no uid, keying it by path");
            info.local_id = self
                .associations
                .local_id_for_remote(&format!("path:{}", info.path));
        } else {
            info.local_id = self.associations.local_id_for_remote(&info.remote_id);
        }
        info
    }
}

#[async_trait]
impl FsOps for LocalIdFao {
    async fn stat(&self, path: &str) -> Result<Option<NodeInfo>> {
        Ok(self
            .delegate
            .stat(path)
            .await?
            .map(|info| self.assign(info)))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<NodeInfo>> {
        Ok(self
            .delegate
            .read_dir(path)
            .await?
            .into_iter()
            .map(|info| self.assign(info))
            .collect())
    }

    async fn read(&self, path: &str, dest: &mut [u8], offset: u64) -> Result<usize> {
        self.delegate.read(path, dest, offset).await
    }

    async fn write(&self, path: &str, src: &[u8], offset: u64) -> Result<usize> {
        self.delegate.write(path, src, offset).await
    }

    async fn create(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        Ok(self.assign(self.delegate.create(parent, name).await?))
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.delegate.truncate(path, size).await
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        Ok(self.assign(self.delegate.mkdir(parent, name).await?))
    }

    async fn symlink(&self, parent: &str, name: &str, target: &str) -> Result<NodeInfo> {
        Ok(self.assign(self.delegate.symlink(parent, name, target).await?))
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.delegate.unlink(path).await
    }

    async fn mv(&self, source: &str, parent: &str, name: &str) -> Result<()> {
        self.delegate.mv(source, parent, name).await
    }

    async fn read_all(&self, path: &str) -> Result<ByteStream> {
        self.delegate.read_all(path).await
    }
}
