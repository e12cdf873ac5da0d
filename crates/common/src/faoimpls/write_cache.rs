use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::engine::{AssociationRegistry, Engine, MutationRef, WriteMutation, WriteOverlay};
use crate::fao::{path, ByteStream, FsOps, NodeInfo, Result};

struct FlushJob {
    path: String,
    mutation: WriteMutation,
    reference: MutationRef,
}

type Flushers = Arc<Mutex<HashMap<String, flume::Sender<FlushJob>>>>;

/// Acknowledges writes immediately and applies them upstream in the
/// background.
///
/// Each write becomes a mutation in the overlay, keyed by the file's local
/// id. One flusher task per key replays that key's writes onto the delegate
/// in arrival order and releases each mutation once it has been applied.
/// Until then, reads and stats see the pending data through the overlay.
pub struct WriteCacheFao {
    delegate: Arc<dyn FsOps>,
    associations: Arc<AssociationRegistry>,
    overlay: WriteOverlay,
    flushers: Flushers,
}

impl WriteCacheFao {
    pub fn new(delegate: Arc<dyn FsOps>, engine: &Engine) -> Self {
        Self {
            delegate,
            associations: engine.associations().clone(),
            overlay: engine.overlay().clone(),
            flushers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The overlay key for `file_path`: the same one `stat` reports sizes
    /// under. An unknown path is stat'ed first so pending writes never end up
    /// under a path key that later reads would miss.
    async fn key(&self, file_path: &str) -> String {
        if let Some(local_id) = self.associations.local_for_path(file_path) {
            return local_id;
        }
        match self.delegate.stat(file_path).await {
            Ok(Some(info)) => Self::node_key(&info, file_path),
            Ok(None) => file_path.to_string(),
            Err(e) => {
                tracing::warn!(
                    path = file_path,
                    error = %e,
                    "could not resolve write key, using path"
                );
                file_path.to_string()
            }
        }
    }

    fn node_key(info: &NodeInfo, fallback_path: &str) -> String {
        if info.local_id.is_empty() {
            fallback_path.to_string()
        } else {
            info.local_id.clone()
        }
    }

    fn with_pending_size(&self, mut info: NodeInfo, key: &str) -> NodeInfo {
        if !info.is_dir {
            if let Some(extent) = self.overlay.extent(key) {
                info.size = info.size.max(extent);
            }
        }
        info
    }

    fn submit(&self, key: String, job: FlushJob) {
        let mut flushers = self.flushers.lock();
        let job = match flushers.get(&key) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(flume::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = flume::unbounded();
        // The receiver is alive, so this cannot fail.
        let _ = sender.send(job);
        flushers.insert(key.clone(), sender);
        tokio::spawn(flush_key(
            key,
            receiver,
            self.delegate.clone(),
            self.flushers.clone(),
        ));
    }
}

/// Apply one key's pending writes in order until none are left, then
/// deregister. The idle check runs under the registry lock so a write
/// submitted concurrently is either seen here or starts a new flusher.
async fn flush_key(
    key: String,
    receiver: flume::Receiver<FlushJob>,
    delegate: Arc<dyn FsOps>,
    flushers: Flushers,
) {
    loop {
        let job = match receiver.try_recv() {
            Ok(job) => job,
            Err(_) => {
                let mut flushers = flushers.lock();
                match receiver.try_recv() {
                    Ok(job) => job,
                    Err(_) => {
                        flushers.remove(&key);
                        return;
                    }
                }
            }
        };

        let FlushJob {
            path,
            mutation,
            reference,
        } = job;
        if let Err(e) = delegate
            .write(&path, &mutation.data, mutation.offset)
            .await
        {
            tracing::error!(
                path = %path,
                offset = mutation.offset,
                len = mutation.data.len(),
                "failed to flush cached write: {}",
                e
            );
        }
        reference.release();
    }
}

#[async_trait]
impl FsOps for WriteCacheFao {
    async fn stat(&self, path: &str) -> Result<Option<NodeInfo>> {
        Ok(self.delegate.stat(path).await?.map(|info| {
            let key = Self::node_key(&info, path);
            self.with_pending_size(info, &key)
        }))
    }

    async fn read_dir(&self, dir_path: &str) -> Result<Vec<NodeInfo>> {
        Ok(self
            .delegate
            .read_dir(dir_path)
            .await?
            .into_iter()
            .map(|info| {
                let key = Self::node_key(&info, &path::join(dir_path, &info.name));
                self.with_pending_size(info, &key)
            })
            .collect())
    }

    async fn read(&self, path: &str, dest: &mut [u8], offset: u64) -> Result<usize> {
        let key = self.key(path).await;
        let n = self.delegate.read(path, dest, offset).await?;
        let patched = self.overlay.apply_to_buffer(&key, dest, offset);
        Ok(n.max(patched))
    }

    async fn write(&self, path: &str, src: &[u8], offset: u64) -> Result<usize> {
        let key = self.key(path).await;
        let mutation = WriteMutation::new(offset, Bytes::copy_from_slice(src));
        let reference = self.overlay.apply_mutation(&key, mutation.clone());
        self.submit(
            key,
            FlushJob {
                path: path.to_string(),
                mutation,
                reference,
            },
        );
        Ok(src.len())
    }

    async fn create(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        self.delegate.create(parent, name).await
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.overlay.settle(&self.key(path).await).await;
        self.delegate.truncate(path, size).await
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        self.delegate.mkdir(parent, name).await
    }

    async fn symlink(&self, parent: &str, name: &str, target: &str) -> Result<NodeInfo> {
        self.delegate.symlink(parent, name, target).await
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.overlay.settle(&self.key(path).await).await;
        self.delegate.unlink(path).await
    }

    async fn mv(&self, source: &str, parent: &str, name: &str) -> Result<()> {
        self.overlay.settle(&self.key(source).await).await;
        self.delegate.mv(source, parent, name).await
    }

    async fn read_all(&self, path: &str) -> Result<ByteStream> {
        self.overlay.settle(&self.key(path).await).await;
        self.delegate.read_all(path).await
    }
}
