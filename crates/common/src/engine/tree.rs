use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use super::association::ROOT_ID;
use super::keyed_lock::KeyedLocks;

#[derive(Debug, Default)]
struct Listing {
    id_to_name: HashMap<String, String>,
    name_to_id: HashMap<String, String>,
    last_listed: Option<Instant>,
}

impl Listing {
    fn link(&mut self, child_id: &str, name: &str) {
        if let Some(previous_name) = self.id_to_name.remove(child_id) {
            self.name_to_id.remove(&previous_name);
        }
        if let Some(previous_id) = self.name_to_id.remove(name) {
            self.id_to_name.remove(&previous_id);
        }
        self.id_to_name
            .insert(child_id.to_string(), name.to_string());
        self.name_to_id
            .insert(name.to_string(), child_id.to_string());
    }

    fn unlink(&mut self, child_id: &str) -> Option<String> {
        let name = self.id_to_name.remove(child_id)?;
        self.name_to_id.remove(&name);
        Some(name)
    }
}

/// One directory's child set in the local mirror of the remote tree.
///
/// The child maps and the listing timestamp sit behind a single lock, so a
/// refresh swaps both at once and readers never see a new child set under
/// an old stamp or the reverse.
#[derive(Debug, Default)]
pub struct DirectoryEntry {
    listing: RwLock<Listing>,
}

impl DirectoryEntry {
    pub fn child_id(&self, name: &str) -> Option<String> {
        self.listing.read().name_to_id.get(name).cloned()
    }

    pub fn child_name(&self, child_id: &str) -> Option<String> {
        self.listing.read().id_to_name.get(child_id).cloned()
    }

    pub fn child_ids(&self) -> Vec<String> {
        self.listing.read().id_to_name.keys().cloned().collect()
    }

    /// `(child id, name)` pairs, in no particular order.
    pub fn children(&self) -> Vec<(String, String)> {
        self.listing
            .read()
            .id_to_name
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect()
    }

    pub fn last_listed(&self) -> Option<Instant> {
        self.listing.read().last_listed
    }

    /// Whether the listing was refreshed less than `ttl` ago.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.listing
            .read()
            .last_listed
            .map(|stamp| stamp.elapsed() < ttl)
            .unwrap_or(false)
    }
}

/// Directory hierarchy keyed by local id, plus the per-path locks that make
/// listing refreshes single-flight.
#[derive(Debug)]
pub struct VirtualTree {
    directories: RwLock<HashMap<String, Arc<DirectoryEntry>>>,
    locks: KeyedLocks<String>,
}

impl VirtualTree {
    pub fn new() -> Self {
        let mut directories = HashMap::new();
        directories.insert(ROOT_ID.to_string(), Arc::new(DirectoryEntry::default()));
        Self {
            directories: RwLock::new(directories),
            locks: KeyedLocks::new(),
        }
    }

    /// Ensure a directory entry exists for `id`. An existing entry, and the
    /// listing it holds, is kept.
    pub fn register_directory(&self, id: &str) -> Arc<DirectoryEntry> {
        if let Some(entry) = self.directories.read().get(id) {
            return entry.clone();
        }
        self.directories
            .write()
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    pub fn directory(&self, id: &str) -> Option<Arc<DirectoryEntry>> {
        self.directories.read().get(id).cloned()
    }

    /// Drop a directory entry. The root is never forgotten.
    pub fn forget_directory(&self, id: &str) {
        if id != ROOT_ID {
            self.directories.write().remove(id);
        }
    }

    /// Walk from the root through linked child names. Returns the local id
    /// of the final component, or `None` if any step is not linked.
    pub fn resolve<'a, I>(&self, parts: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = ROOT_ID.to_string();
        for part in parts.into_iter().filter(|part| !part.is_empty()) {
            current = self.directory(&current)?.child_id(part)?;
        }
        Some(current)
    }

    /// Add `child_id` under `parent_id` as `name`, replacing whatever held
    /// that name. Returns `false` when the parent is not a known directory.
    pub fn link(&self, parent_id: &str, child_id: &str, name: &str) -> bool {
        match self.directory(parent_id) {
            Some(entry) => {
                entry.listing.write().link(child_id, name);
                true
            }
            None => false,
        }
    }

    /// Remove `child_id` from `parent_id`, returning the name it was linked as.
    pub fn unlink(&self, parent_id: &str, child_id: &str) -> Option<String> {
        self.directory(parent_id)?.listing.write().unlink(child_id)
    }

    /// Replace a directory's whole child set and stamp it as freshly listed.
    /// Returns the names that were present before and are now gone.
    pub fn replace_listing<I>(&self, parent_id: &str, children: I) -> Vec<String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let entry = self.register_directory(parent_id);

        let mut fresh = Listing::default();
        for (child_id, name) in children {
            fresh.link(&child_id, &name);
        }
        fresh.last_listed = Some(Instant::now());

        let mut listing = entry.listing.write();
        let gone = listing
            .name_to_id
            .keys()
            .filter(|name| !fresh.name_to_id.contains_key(*name))
            .cloned()
            .collect();
        *listing = fresh;
        gone
    }

    /// Mark a directory's listing as stale without touching its children.
    pub fn invalidate(&self, id: &str) {
        if let Some(entry) = self.directory(id) {
            entry.listing.write().last_listed = None;
        }
    }

    /// Per-path locks guarding listing refreshes.
    pub fn locks(&self) -> &KeyedLocks<String> {
        &self.locks
    }
}

impl Default for VirtualTree {
    fn default() -> Self {
        Self::new()
    }
}
