//! Inode to path mapping for the FUSE adapter
//!
//! Inode numbers are allocated by the engine's association registry, one per
//! local id. The kernel only hands inodes back, while the pipeline works on
//! paths, so this table remembers where each inode was last seen.

use std::collections::HashMap;

use common::engine::ROOT_INO;
use common::fao::path;

pub struct InodeTable {
    inode_to_path: HashMap<u64, String>,
    path_to_inode: HashMap<String, u64>,
}

impl InodeTable {
    /// A table that knows only the mount root.
    pub fn new() -> Self {
        let mut table = Self {
            inode_to_path: HashMap::new(),
            path_to_inode: HashMap::new(),
        };
        table.insert(ROOT_INO, "/");
        table
    }

    /// Record that `ino` lives at `node_path`, replacing whatever either side
    /// pointed at before.
    pub fn insert(&mut self, ino: u64, node_path: &str) {
        if let Some(old_path) = self.inode_to_path.insert(ino, node_path.to_string()) {
            if old_path != node_path {
                self.path_to_inode.remove(&old_path);
            }
        }
        if let Some(old_ino) = self.path_to_inode.insert(node_path.to_string(), ino) {
            if old_ino != ino {
                self.inode_to_path.remove(&old_ino);
            }
        }
    }

    pub fn get_path(&self, ino: u64) -> Option<&str> {
        self.inode_to_path.get(&ino).map(String::as_str)
    }

    pub fn get_inode(&self, node_path: &str) -> Option<u64> {
        self.path_to_inode.get(node_path).copied()
    }

    /// Forget `node_path` and everything below it.
    pub fn remove_subtree(&mut self, node_path: &str) {
        let gone: Vec<String> = self
            .path_to_inode
            .keys()
            .filter(|p| path::is_within(p, node_path))
            .cloned()
            .collect();
        for p in gone {
            if let Some(ino) = self.path_to_inode.remove(&p) {
                if ino != ROOT_INO {
                    self.inode_to_path.remove(&ino);
                }
            }
        }
    }

    /// Move `from` and its descendants under `to`, keeping their inodes.
    pub fn rename(&mut self, from: &str, to: &str) {
        self.remove_subtree(to);
        let moved: Vec<(String, u64)> = self
            .path_to_inode
            .iter()
            .filter(|(p, _)| path::is_within(p, from))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        for (old_path, ino) in moved {
            self.path_to_inode.remove(&old_path);
            let new_path = path::rebase(&old_path, from, to);
            self.inode_to_path.insert(ino, new_path.clone());
            self.path_to_inode.insert(new_path, ino);
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preloaded() {
        let table = InodeTable::new();
        assert_eq!(table.get_path(ROOT_INO), Some("/"));
        assert_eq!(table.get_inode("/"), Some(ROOT_INO));
    }

    #[test]
    fn test_reinsert_moves_inode() {
        let mut table = InodeTable::new();
        table.insert(2, "/a");
        table.insert(2, "/b");
        assert_eq!(table.get_path(2), Some("/b"));
        assert_eq!(table.get_inode("/a"), None);

        // A new object at an old path takes the path over.
        table.insert(3, "/b");
        assert_eq!(table.get_inode("/b"), Some(3));
        assert_eq!(table.get_path(2), None);
    }

    #[test]
    fn test_rename_carries_descendants() {
        let mut table = InodeTable::new();
        table.insert(2, "/docs");
        table.insert(3, "/docs/a.txt");
        table.insert(4, "/docsx");
        table.insert(5, "/archive");

        table.rename("/docs", "/archive");
        assert_eq!(table.get_path(2), Some("/archive"));
        assert_eq!(table.get_path(3), Some("/archive/a.txt"));
        assert_eq!(table.get_path(4), Some("/docsx"));
        assert_eq!(table.get_path(5), None);
        assert_eq!(table.get_inode("/docs/a.txt"), None);
    }

    #[test]
    fn test_remove_subtree() {
        let mut table = InodeTable::new();
        table.insert(2, "/docs");
        table.insert(3, "/docs/a.txt");
        table.remove_subtree("/docs");
        assert_eq!(table.get_path(2), None);
        assert_eq!(table.get_path(3), None);
        assert_eq!(table.get_path(ROOT_INO), Some("/"));
    }
}
