use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use super::ttl_cache::TtlCache;
use crate::fao::path;
use crate::fao::NodeInfo;

/// Local identifier reserved for the mount root.
pub const ROOT_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Inode number of the mount root, as FUSE expects.
pub const ROOT_INO: u64 = 1;

#[derive(Debug, Default)]
struct Identities {
    remote_to_local: HashMap<String, String>,
    local_to_remote: HashMap<String, String>,
}

#[derive(Debug)]
struct Inodes {
    local_to_ino: HashMap<String, u64>,
    ino_to_local: HashMap<u64, String>,
    next: u64,
}

/// Identity and metadata indices shared by every cache in the pipeline.
///
/// Identity mappings (`remote ⇄ local`, `local → inode`) live for the
/// process lifetime. Metadata is held in a TTL cache keyed by local id, and
/// the `path → local` index is kept in step with it by the tree cache.
#[derive(Debug)]
pub struct AssociationRegistry {
    identities: RwLock<Identities>,
    inodes: RwLock<Inodes>,
    paths: RwLock<HashMap<String, String>>,
    hashes: RwLock<HashMap<String, String>>,
    node_info: TtlCache<String, NodeInfo>,
}

impl AssociationRegistry {
    pub fn new() -> Self {
        let mut inodes = Inodes {
            local_to_ino: HashMap::new(),
            ino_to_local: HashMap::new(),
            next: ROOT_INO + 1,
        };
        inodes.local_to_ino.insert(ROOT_ID.to_string(), ROOT_INO);
        inodes.ino_to_local.insert(ROOT_INO, ROOT_ID.to_string());

        let mut paths = HashMap::new();
        paths.insert("/".to_string(), ROOT_ID.to_string());

        Self {
            identities: RwLock::new(Identities::default()),
            inodes: RwLock::new(inodes),
            paths: RwLock::new(paths),
            hashes: RwLock::new(HashMap::new()),
            node_info: TtlCache::new(),
        }
    }

    /// The local id for a remote id, minting one on first sight.
    pub fn local_id_for_remote(&self, remote_id: &str) -> String {
        if let Some(local) = self.identities.read().remote_to_local.get(remote_id) {
            return local.clone();
        }

        let mut identities = self.identities.write();
        if let Some(local) = identities.remote_to_local.get(remote_id) {
            return local.clone();
        }

        let local = Uuid::new_v4().to_string();
        identities
            .remote_to_local
            .insert(remote_id.to_string(), local.clone());
        identities
            .local_to_remote
            .insert(local.clone(), remote_id.to_string());
        local
    }

    /// Associate the remote id of the mount root with [`ROOT_ID`].
    pub fn bind_root(&self, remote_id: &str) {
        let mut identities = self.identities.write();
        identities
            .remote_to_local
            .insert(remote_id.to_string(), ROOT_ID.to_string());
        identities
            .local_to_remote
            .insert(ROOT_ID.to_string(), remote_id.to_string());
    }

    pub fn remote_id_for_local(&self, local_id: &str) -> Option<String> {
        self.identities.read().local_to_remote.get(local_id).cloned()
    }

    /// The inode number for a local id, allocating the next one on first use.
    pub fn ino_for_local(&self, local_id: &str) -> u64 {
        if let Some(ino) = self.inodes.read().local_to_ino.get(local_id) {
            return *ino;
        }

        let mut inodes = self.inodes.write();
        if let Some(ino) = inodes.local_to_ino.get(local_id) {
            return *ino;
        }

        let ino = inodes.next;
        inodes.next += 1;
        inodes.local_to_ino.insert(local_id.to_string(), ino);
        inodes.ino_to_local.insert(ino, local_id.to_string());
        ino
    }

    pub fn local_for_ino(&self, ino: u64) -> Option<String> {
        self.inodes.read().ino_to_local.get(&ino).cloned()
    }

    pub fn local_for_path(&self, path: &str) -> Option<String> {
        self.paths.read().get(path).cloned()
    }

    pub fn set_path(&self, path: &str, local_id: &str) {
        self.paths
            .write()
            .insert(path.to_string(), local_id.to_string());
    }

    pub fn remove_path(&self, path: &str) -> Option<String> {
        self.paths.write().remove(path)
    }

    /// Forget `path` and everything beneath it, including content hashes.
    pub fn remove_subtree(&self, root: &str) {
        self.paths
            .write()
            .retain(|candidate, _| !path::is_within(candidate, root));
        self.hashes
            .write()
            .retain(|candidate, _| !path::is_within(candidate, root));
    }

    /// Re-key `from` and everything beneath it onto `to`. Anything already
    /// indexed under `to` is dropped first.
    pub fn rename_subtree(&self, from: &str, to: &str) {
        let mut paths = self.paths.write();
        paths.retain(|candidate, _| !path::is_within(candidate, to));
        let moved: Vec<(String, String)> = paths
            .iter()
            .filter(|(candidate, _)| path::is_within(candidate, from))
            .map(|(candidate, id)| (candidate.clone(), id.clone()))
            .collect();
        for (old, id) in moved {
            paths.remove(&old);
            paths.insert(path::rebase(&old, from, to), id);
        }
        drop(paths);

        self.hashes.write().retain(|candidate, _| {
            !path::is_within(candidate, from) && !path::is_within(candidate, to)
        });
    }

    /// Cached metadata keyed by local id.
    pub fn node_info(&self) -> &TtlCache<String, NodeInfo> {
        &self.node_info
    }

    pub fn hash_for_path(&self, path: &str) -> Option<String> {
        self.hashes.read().get(path).cloned()
    }

    pub fn set_hash(&self, path: &str, hash: &str) {
        self.hashes
            .write()
            .insert(path.to_string(), hash.to_string());
    }

    pub fn remove_hash(&self, path: &str) -> Option<String> {
        self.hashes.write().remove(path)
    }

    /// Remove the content hash for `path` only if it is still `hash`.
    pub fn remove_hash_if(&self, path: &str, hash: &str) -> bool {
        let mut hashes = self.hashes.write();
        if hashes.get(path).map(String::as_str) == Some(hash) {
            hashes.remove(path);
            true
        } else {
            false
        }
    }
}

impl Default for AssociationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_is_stable_per_remote_id() {
        let registry = AssociationRegistry::new();
        let first = registry.local_id_for_remote("remote-a");
        let again = registry.local_id_for_remote("remote-a");
        let other = registry.local_id_for_remote("remote-b");

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(
            registry.remote_id_for_local(&first).as_deref(),
            Some("remote-a")
        );
    }

    #[test]
    fn test_inodes_are_monotonic_and_root_is_one() {
        let registry = AssociationRegistry::new();
        assert_eq!(registry.ino_for_local(ROOT_ID), ROOT_INO);

        let a = registry.ino_for_local("a");
        let b = registry.ino_for_local("b");
        assert_eq!(a, 2);
        assert_eq!(b, 3);
        assert_eq!(registry.ino_for_local("a"), 2);
        assert_eq!(registry.local_for_ino(3).as_deref(), Some("b"));
    }

    #[test]
    fn test_root_path_is_preassociated() {
        let registry = AssociationRegistry::new();
        assert_eq!(registry.local_for_path("/").as_deref(), Some(ROOT_ID));

        registry.bind_root("remote-root");
        assert_eq!(registry.local_id_for_remote("remote-root"), ROOT_ID);
    }

    #[test]
    fn test_rename_subtree_moves_descendants() {
        let registry = AssociationRegistry::new();
        registry.set_path("/a", "1");
        registry.set_path("/a/b", "2");
        registry.set_path("/a/b/c", "3");
        registry.set_path("/ab", "4");
        registry.set_path("/x", "5");
        registry.set_hash("/a/b/c", "h");

        registry.rename_subtree("/a", "/x");

        assert_eq!(registry.local_for_path("/x").as_deref(), Some("1"));
        assert_eq!(registry.local_for_path("/x/b/c").as_deref(), Some("3"));
        assert_eq!(registry.local_for_path("/ab").as_deref(), Some("4"));
        assert!(registry.local_for_path("/a").is_none());
        assert!(registry.hash_for_path("/a/b/c").is_none());
    }

    #[test]
    fn test_remove_hash_if_only_matches_current() {
        let registry = AssociationRegistry::new();
        registry.set_hash("/f", "old");
        registry.set_hash("/f", "new");
        assert!(!registry.remove_hash_if("/f", "old"));
        assert!(registry.remove_hash_if("/f", "new"));
        assert!(registry.hash_for_path("/f").is_none());
    }
}
