use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap<K> = Arc<RwLock<HashMap<K, Arc<Mutex<()>>>>>;

/// A registry of per-key async mutexes.
///
/// Creating the mutex for a key is itself race-free: the map is checked
/// under the read lock and, on a miss, checked again under the write lock
/// before inserting. Holding the map lock never spans an await. A key's
/// entry is dropped again when its last guard is released and nobody is
/// waiting on it.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: LockMap<K>,
}

/// Exclusive ownership of one key of a [`KeyedLocks`].
#[derive(Debug)]
pub struct KeyedLockGuard<K>
where
    K: Eq + Hash,
{
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    locks: LockMap<K>,
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // Release the mutex first so its Arc no longer counts as a user.
        drop(self.guard.take());

        let mut locks = self.locks.write();
        let idle = locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.key);
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn handle<Q>(&self, key: &Q) -> Arc<Mutex<()>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(lock) = self.locks.read().get(key) {
            return lock.clone();
        }

        let mut locks = self.locks.write();
        locks.entry(key.to_owned()).or_default().clone()
    }

    fn wrap<Q>(&self, key: &Q, guard: OwnedMutexGuard<()>) -> KeyedLockGuard<K>
    where
        Q: ToOwned<Owned = K> + ?Sized,
    {
        KeyedLockGuard {
            guard: Some(guard),
            key: key.to_owned(),
            locks: self.locks.clone(),
        }
    }

    /// Wait for exclusive ownership of `key`.
    pub async fn lock<Q>(&self, key: &Q) -> KeyedLockGuard<K>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let guard = self.handle(key).lock_owned().await;
        self.wrap(key, guard)
    }

    /// Take ownership of `key` only if nobody currently holds it.
    pub fn try_lock<Q>(&self, key: &Q) -> Option<KeyedLockGuard<K>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let guard = self.handle(key).try_lock_owned().ok()?;
        Some(self.wrap(key, guard))
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
