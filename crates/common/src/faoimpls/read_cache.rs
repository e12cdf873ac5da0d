use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::{AssociationRegistry, BlobCache, BlobRef, Engine, KeyedLocks};
use crate::fao::{path, ByteStream, FsOps, NodeInfo, Result};

/// Serves reads from whole-file blobs kept in the content cache.
///
/// The first read of a path downloads the whole file once and keeps it for
/// `read_ttl`; reads inside that window never reach the delegate. Any local
/// change to the path drops the association, and a download that overlapped
/// such a change is served once but never cached.
pub struct ReadCacheFao {
    delegate: Arc<dyn FsOps>,
    associations: Arc<AssociationRegistry>,
    blobs: BlobCache,
    locks: KeyedLocks<String>,
    /// Paths with a download in flight, flagged when a local change lands
    /// before it finishes.
    downloads: Mutex<HashMap<String, bool>>,
    ttl: Duration,
}

impl ReadCacheFao {
    pub fn new(delegate: Arc<dyn FsOps>, engine: &Engine) -> Self {
        Self {
            delegate,
            associations: engine.associations().clone(),
            blobs: engine.blobs().clone(),
            locks: KeyedLocks::new(),
            downloads: Mutex::new(HashMap::new()),
            ttl: engine.config().read_ttl,
        }
    }

    async fn cached_read(
        &self,
        file_path: &str,
        dest: &mut [u8],
        offset: u64,
    ) -> Result<Option<usize>> {
        let Some(hash) = self.associations.hash_for_path(file_path) else {
            return Ok(None);
        };
        Ok(self.blobs.get_bytes(&hash, offset, dest).await?)
    }

    /// Store the whole file in the blob cache and copy the requested window
    /// out of it.
    async fn download(
        &self,
        file_path: &str,
        dest: &mut [u8],
        offset: u64,
    ) -> Result<(BlobRef, usize)> {
        let body = self.delegate.read_all(file_path).await?;
        let reference = self.blobs.store(body).await?;
        let n = self
            .blobs
            .get_bytes(reference.hash(), offset, dest)
            .await?
            .unwrap_or(0);
        Ok((reference, n))
    }

    fn invalidate(&self, file_path: &str) {
        if let Some(stale) = self.downloads.lock().get_mut(file_path) {
            *stale = true;
        }
        if let Some(hash) = self.associations.remove_hash(file_path) {
            tracing::trace!(path = file_path, %hash, "dropped cached content");
        }
    }
}

#[async_trait]
impl FsOps for ReadCacheFao {
    async fn stat(&self, path: &str) -> Result<Option<NodeInfo>> {
        self.delegate.stat(path).await
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<NodeInfo>> {
        self.delegate.read_dir(path).await
    }

    async fn read(&self, path: &str, dest: &mut [u8], offset: u64) -> Result<usize> {
        if let Some(n) = self.cached_read(path, dest, offset).await? {
            return Ok(n);
        }

        let _guard = self.locks.lock(path).await;
        if let Some(n) = self.cached_read(path, dest, offset).await? {
            return Ok(n);
        }

        self.downloads.lock().insert(path.to_string(), false);
        let fetched = self.download(path, dest, offset).await;
        let stale = {
            let mut downloads = self.downloads.lock();
            let stale = downloads.remove(path).unwrap_or(true);
            if let (false, Ok((reference, _))) = (stale, &fetched) {
                self.associations.set_hash(path, reference.hash());
            }
            stale
        };
        let (reference, n) = fetched?;

        if stale {
            tracing::debug!(path, "content changed during download, not caching");
            reference.release();
            return Ok(n);
        }

        let associations = self.associations.clone();
        let file_path = path.to_string();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            associations.remove_hash_if(&file_path, reference.hash());
            reference.release();
        });

        Ok(n)
    }

    async fn write(&self, path: &str, src: &[u8], offset: u64) -> Result<usize> {
        let result = self.delegate.write(path, src, offset).await;
        self.invalidate(path);
        result
    }

    async fn create(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        let result = self.delegate.create(parent, name).await;
        self.invalidate(&path::join(parent, name));
        result
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let result = self.delegate.truncate(path, size).await;
        self.invalidate(path);
        result
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        self.delegate.mkdir(parent, name).await
    }

    async fn symlink(&self, parent: &str, name: &str, target: &str) -> Result<NodeInfo> {
        self.delegate.symlink(parent, name, target).await
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        let result = self.delegate.unlink(path).await;
        self.invalidate(path);
        result
    }

    async fn mv(&self, source: &str, parent: &str, name: &str) -> Result<()> {
        let result = self.delegate.mv(source, parent, name).await;
        self.invalidate(source);
        self.invalidate(&path::join(parent, name));
        result
    }

    async fn read_all(&self, path: &str) -> Result<ByteStream> {
        self.delegate.read_all(path).await
    }
}
