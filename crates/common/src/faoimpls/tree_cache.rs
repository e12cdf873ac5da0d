use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::engine::{AssociationRegistry, Engine, VirtualTree, ROOT_ID};
use crate::fao::{path, ByteStream, FaoError, FsOps, NodeInfo, Result};

/// Answers `stat` and `read_dir` from the virtual tree while listings are
/// fresh, and keeps the tree in step with local mutations so new entries are
/// visible without waiting for a listing to expire.
pub struct TreeCacheFao {
    delegate: Arc<dyn FsOps>,
    associations: Arc<AssociationRegistry>,
    tree: Arc<VirtualTree>,
    ttl: Duration,
}

impl TreeCacheFao {
    pub fn new(delegate: Arc<dyn FsOps>, engine: &Engine) -> Self {
        Self {
            delegate,
            associations: engine.associations().clone(),
            tree: engine.tree().clone(),
            ttl: engine.config().tree_ttl,
        }
    }

    /// Cache `info` as the node at `node_path` and, when `parent_id` is
    /// given, link it into that directory. All of it happens while the
    /// node's metadata lock is held, so a concurrent `stat` never sees the
    /// path without its metadata.
    async fn index(
        &self,
        node_path: &str,
        mut info: NodeInfo,
        parent_id: Option<&str>,
    ) -> NodeInfo {
        if info.local_id.is_empty() {
            return info;
        }
        if info.path.is_empty() {
            info.path = node_path.to_string();
        }
        info.last_stat = Some(Instant::now());

        let _guard = self
            .associations
            .node_info()
            .set_and_lock(info.local_id.clone(), info.clone(), self.ttl)
            .await;
        self.associations.set_path(node_path, &info.local_id);
        if info.is_dir {
            self.tree.register_directory(&info.local_id);
        }
        if let Some(parent_id) = parent_id {
            self.tree
                .link(parent_id, &info.local_id, &path::base_name(node_path));
        }
        info
    }

    /// The local id of a directory that is about to gain or lose children.
    /// It must already be known: something listed or stat'ed it first.
    fn parent_id(&self, parent: &str) -> Result<String> {
        match self.associations.local_for_path(parent) {
            Some(id) if self.tree.directory(&id).is_some() => Ok(id),
            Some(_) => Err(FaoError::NotADirectory(parent.to_string())),
            None => {
                tracing::error!(parent, "mutation under a directory with no cached identity");
                Err(FaoError::ProtocolViolation(format!(
                    "no cached identity for parent directory {}",
                    parent
                )))
            }
        }
    }

    fn forget(&self, node_path: &str, local_id: &str) {
        self.associations.node_info().remove(local_id);
        self.tree.forget_directory(local_id);
        self.associations.remove_subtree(node_path);
    }

    /// Resolve a directory path to its local id, stat'ing it when unknown.
    async fn directory_id(&self, dir_path: &str) -> Result<String> {
        if dir_path == "/" {
            return Ok(ROOT_ID.to_string());
        }
        match self.stat(dir_path).await? {
            Some(info) if info.is_dir => Ok(info.local_id),
            Some(_) => Err(FaoError::NotADirectory(dir_path.to_string())),
            None => Err(FaoError::NotFound(dir_path.to_string())),
        }
    }

    /// A fresh listing with every child's metadata still cached, or `None`.
    fn cached_listing(&self, dir_id: &str) -> Option<Vec<NodeInfo>> {
        let entry = self.tree.directory(dir_id)?;
        if !entry.is_fresh(self.ttl) {
            return None;
        }
        entry
            .child_ids()
            .iter()
            .map(|child_id| self.associations.node_info().get(child_id))
            .collect()
    }

    async fn refresh_listing(&self, dir_path: &str, dir_id: &str) -> Result<Vec<NodeInfo>> {
        let children = self.delegate.read_dir(dir_path).await?;
        let now = Instant::now();

        let mut linked = Vec::with_capacity(children.len());
        let mut listing = Vec::with_capacity(children.len());
        for mut child in children {
            if child.local_id.is_empty() {
                listing.push(child);
                continue;
            }
            let child_path = path::join(dir_path, &child.name);
            child.path = child_path.clone();
            child.last_stat = Some(now);

            if child.is_dir {
                self.tree.register_directory(&child.local_id);
            }
            let guard = self
                .associations
                .node_info()
                .set_and_lock(child.local_id.clone(), child.clone(), self.ttl)
                .await;
            self.associations.set_path(&child_path, &child.local_id);
            drop(guard);
            linked.push((child.local_id.clone(), child.name.clone()));
            listing.push(child);
        }

        for name in self.tree.replace_listing(dir_id, linked) {
            self.associations
                .remove_subtree(&path::join(dir_path, &name));
        }
        tracing::trace!(path = dir_path, entries = listing.len(), "directory listing refreshed");
        Ok(listing)
    }

    fn bump_size(&self, file_path: &str, size: impl FnOnce(u64) -> u64) {
        let Some(local_id) = self.associations.local_for_path(file_path) else {
            return;
        };
        if let Some(mut info) = self.associations.node_info().get(&local_id) {
            info.size = size(info.size);
            self.associations.node_info().set(local_id, info, self.ttl);
        }
    }
}

#[async_trait]
impl FsOps for TreeCacheFao {
    async fn stat(&self, path: &str) -> Result<Option<NodeInfo>> {
        if path == "/" {
            let root = self
                .associations
                .node_info()
                .get_or_set(ROOT_ID, Duration::ZERO, || async {
                    Ok::<_, FaoError>(Some(NodeInfo::root()))
                })
                .await?;
            return Ok(root);
        }

        if let Some(local_id) = self.associations.local_for_path(path) {
            let mut replaced = None;
            let slot = &mut replaced;
            let delegate = &self.delegate;
            let expected = local_id.as_str();
            let found = self
                .associations
                .node_info()
                .get_or_set(local_id.as_str(), self.ttl, move || async move {
                    match delegate.stat(path).await? {
                        Some(mut info) if info.local_id == expected => {
                            info.last_stat = Some(Instant::now());
                            Ok::<_, FaoError>(Some(info))
                        }
                        Some(other) => {
                            *slot = Some(other);
                            Ok(None)
                        }
                        None => Ok(None),
                    }
                })
                .await?;

            if found.is_some() {
                return Ok(found);
            }

            // The path is gone, or now names a different remote object.
            self.forget(path, &local_id);
            return match replaced {
                Some(info) => {
                    let parent_id = self.associations.local_for_path(&path::parent(path));
                    Ok(Some(self.index(path, info, parent_id.as_deref()).await))
                }
                None => Ok(None),
            };
        }

        let _guard = self.tree.locks().lock(path).await;
        if let Some(info) = self
            .associations
            .local_for_path(path)
            .and_then(|local_id| self.associations.node_info().get(&local_id))
        {
            return Ok(Some(info));
        }

        match self.delegate.stat(path).await? {
            Some(info) => Ok(Some(self.index(path, info, None).await)),
            None => Ok(None),
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<NodeInfo>> {
        let dir_id = self.directory_id(path).await?;
        if let Some(listing) = self.cached_listing(&dir_id) {
            return Ok(listing);
        }

        let _guard = self.tree.locks().lock(path).await;
        if let Some(listing) = self.cached_listing(&dir_id) {
            return Ok(listing);
        }
        self.refresh_listing(path, &dir_id).await
    }

    async fn read(&self, path: &str, dest: &mut [u8], offset: u64) -> Result<usize> {
        self.delegate.read(path, dest, offset).await
    }

    async fn write(&self, path: &str, src: &[u8], offset: u64) -> Result<usize> {
        let n = self.delegate.write(path, src, offset).await?;
        self.bump_size(path, |size| size.max(offset + n as u64));
        Ok(n)
    }

    async fn create(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        let parent_id = self.parent_id(parent)?;
        let info = self.delegate.create(parent, name).await?;
        Ok(self
            .index(&path::join(parent, name), info, Some(&parent_id))
            .await)
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.delegate.truncate(path, size).await?;
        self.bump_size(path, |_| size);
        Ok(())
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        let parent_id = self.parent_id(parent)?;
        let info = self.delegate.mkdir(parent, name).await?;
        Ok(self
            .index(&path::join(parent, name), info, Some(&parent_id))
            .await)
    }

    async fn symlink(&self, parent: &str, name: &str, target: &str) -> Result<NodeInfo> {
        let parent_id = self.parent_id(parent)?;
        let info = self.delegate.symlink(parent, name, target).await?;
        Ok(self
            .index(&path::join(parent, name), info, Some(&parent_id))
            .await)
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.delegate.unlink(path).await?;

        match self.associations.local_for_path(path) {
            Some(local_id) => {
                if let Some(parent_id) = self.associations.local_for_path(&path::parent(path)) {
                    self.tree.unlink(&parent_id, &local_id);
                }
                self.forget(path, &local_id);
            }
            None => self.associations.remove_subtree(path),
        }
        Ok(())
    }

    async fn mv(&self, source: &str, parent: &str, name: &str) -> Result<()> {
        let new_parent_id = self.parent_id(parent)?;
        self.delegate.mv(source, parent, name).await?;

        let destination = path::join(parent, name);
        let Some(local_id) = self.associations.local_for_path(source) else {
            self.associations.remove_subtree(source);
            self.tree.invalidate(&new_parent_id);
            return Ok(());
        };

        if let Some(old_parent_id) = self.associations.local_for_path(&path::parent(source)) {
            self.tree.unlink(&old_parent_id, &local_id);
        }
        if let Some(previous) = self.associations.local_for_path(&destination) {
            if previous != local_id {
                self.tree.unlink(&new_parent_id, &previous);
                self.associations.node_info().remove(&previous);
                self.tree.forget_directory(&previous);
            }
        }

        self.associations.rename_subtree(source, &destination);
        self.tree.link(&new_parent_id, &local_id, name);
        if let Some(mut info) = self.associations.node_info().get(&local_id) {
            info.path = destination;
            info.name = name.to_string();
            self.associations.node_info().set(local_id.clone(), info, self.ttl);
        }
        // Children cached under the old location carry stale paths.
        self.tree.invalidate(&local_id);
        Ok(())
    }

    async fn read_all(&self, path: &str) -> Result<ByteStream> {
        self.delegate.read_all(path).await
    }
}
