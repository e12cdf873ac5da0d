use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use super::keyed_lock::{KeyedLockGuard, KeyedLocks};

#[derive(Debug)]
struct Slot<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> Slot<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.ttl.is_zero() || now.duration_since(self.stored_at) < self.ttl
    }
}

/// A keyed cache with per-entry TTLs and single-flight population.
///
/// A zero TTL keeps an entry until it is removed. Lookups of live entries
/// only take the map's read lock; population goes through a per-key mutex
/// so that concurrent misses on one key run the factory exactly once.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Slot<V>>>,
    locks: KeyedLocks<K>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    /// The live value for `key`, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|slot| slot.is_live(Instant::now()))
            .map(|slot| slot.value.clone())
    }

    /// Return the live value for `key`, populating it with `factory` on a miss.
    ///
    /// The factory runs while the key's lock is held and its result is only
    /// stored when it yields `Some`. Callers that lose the race wait for the
    /// winner and then observe its value instead of calling the factory.
    pub async fn get_or_set<Q, F, Fut, E>(
        &self,
        key: &Q,
        ttl: Duration,
        factory: F,
    ) -> Result<Option<V>, E>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(Some(value));
        }

        let _guard = self.locks.lock(key).await;
        if let Some(value) = self.get(key) {
            return Ok(Some(value));
        }

        match factory().await? {
            Some(value) => {
                self.insert(key.to_owned(), value.clone(), ttl);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Store a value without going through the population lock.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.insert(key, value, ttl);
    }

    /// Store a value while holding the key's population lock, and hand the
    /// lock back so the caller can finish related updates before any waiting
    /// `get_or_set` proceeds.
    pub async fn set_and_lock(&self, key: K, value: V, ttl: Duration) -> KeyedLockGuard<K> {
        let guard = self.locks.lock(&key).await;
        self.insert(key, value, ttl);
        guard
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.write().remove(key).map(|slot| slot.value)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, slot| slot.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: K, value: V, ttl: Duration) {
        self.entries.write().insert(
            key,
            Slot {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
