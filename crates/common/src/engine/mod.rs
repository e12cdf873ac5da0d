//! Shared services the pipeline stages are built on.
//!
//! An [`Engine`] owns one instance of each: the association registry, the
//! virtual directory tree, the content blob cache, the write overlay and the
//! operation batcher. Pipeline stages borrow what they need from it.

mod association;
mod batcher;
mod blob_cache;
mod config;
mod keyed_lock;
mod signal;
mod tree;
mod ttl_cache;
mod write_overlay;

use std::sync::Arc;

pub use association::{AssociationRegistry, ROOT_ID, ROOT_INO};
pub use batcher::{Operation, OperationBatcher};
pub use blob_cache::{BlobCache, BlobCacheError, BlobReader, BlobRef};
pub use config::EngineConfig;
pub use keyed_lock::{KeyedLockGuard, KeyedLocks};
pub use signal::Signal;
pub use tree::{DirectoryEntry, VirtualTree};
pub use ttl_cache::TtlCache;
pub use write_overlay::{MutationRef, WriteMutation, WriteOverlay};

use crate::remote::RemoteStorage;

#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    remote: Arc<dyn RemoteStorage>,
    associations: Arc<AssociationRegistry>,
    tree: Arc<VirtualTree>,
    blobs: BlobCache,
    overlay: WriteOverlay,
    batcher: OperationBatcher,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("batcher", &self.batcher)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build the shared services over `remote`. Must be called from within a
    /// tokio runtime, since the batcher spawns its drain task.
    pub fn new(config: EngineConfig, remote: Arc<dyn RemoteStorage>) -> Self {
        let batcher = OperationBatcher::new(
            remote.clone(),
            config.max_batch,
            config.flush_interval,
            config.request_timeout,
        );
        tracing::debug!(
            cache_dir = %config.cache_dir.display(),
            max_batch = config.max_batch,
            "engine initialised"
        );

        Self {
            blobs: BlobCache::new(config.cache_dir.clone()),
            config,
            remote,
            associations: Arc::new(AssociationRegistry::new()),
            tree: Arc::new(VirtualTree::new()),
            overlay: WriteOverlay::new(),
            batcher,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStorage> {
        &self.remote
    }

    pub fn associations(&self) -> &Arc<AssociationRegistry> {
        &self.associations
    }

    pub fn tree(&self) -> &Arc<VirtualTree> {
        &self.tree
    }

    pub fn blobs(&self) -> &BlobCache {
        &self.blobs
    }

    pub fn overlay(&self) -> &WriteOverlay {
        &self.overlay
    }

    pub fn batcher(&self) -> &OperationBatcher {
        &self.batcher
    }

    /// Flush queued remote operations and stop background work.
    pub async fn shutdown(&self) {
        self.batcher.shutdown().await;
    }
}
