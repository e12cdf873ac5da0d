//! Content-addressed, reference-counted blob storage on local disk.
//!
//! A blob lives while at least one [`BlobRef`] to it is alive. Dropping or
//! releasing the last reference fires the entry's *released* signal, after
//! which a background task removes it from the index (*forgotten*) and then
//! deletes its file (*evicted*). Once an entry has no references it can
//! never gain new ones; [`BlobCache::hold`] returns `None` instead.

use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::{Mutex, RwLock};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, ReadBuf, Take};
use uuid::Uuid;

use super::keyed_lock::KeyedLocks;
use super::signal::Signal;
use crate::fao::FaoError;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum BlobCacheError {
    #[error("blob cache io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BlobCacheError> for FaoError {
    fn from(err: BlobCacheError) -> Self {
        match err {
            BlobCacheError::Io(e) => FaoError::Io(e),
        }
    }
}

#[derive(Debug, Default)]
struct References {
    live: HashSet<u64>,
    next: u64,
}

#[derive(Debug)]
struct BlobEntry {
    hash: String,
    path: PathBuf,
    references: Mutex<References>,
    released: Signal,
    forgotten: Signal,
    evicted: Signal,
}

impl BlobEntry {
    fn new(hash: String, path: PathBuf) -> Self {
        Self {
            hash,
            path,
            references: Mutex::new(References::default()),
            released: Signal::new(),
            forgotten: Signal::new(),
            evicted: Signal::new(),
        }
    }

    /// Add a reference unless the entry has already dropped to zero.
    fn hold(self: &Arc<Self>, allow_first: bool) -> Option<BlobRef> {
        let mut references = self.references.lock();
        if references.live.is_empty() && !allow_first {
            return None;
        }
        let id = references.next;
        references.next += 1;
        references.live.insert(id);
        Some(BlobRef {
            entry: self.clone(),
            id,
        })
    }

    fn release(&self, id: u64) {
        let mut references = self.references.lock();
        if references.live.remove(&id) && references.live.is_empty() {
            self.released.fire();
        }
    }
}

/// One holder's claim on a cached blob. Released on drop.
#[derive(Debug)]
pub struct BlobRef {
    entry: Arc<BlobEntry>,
    id: u64,
}

impl BlobRef {
    pub fn hash(&self) -> &str {
        &self.entry.hash
    }

    /// Give up this reference. Releasing twice is a no-op, and the call
    /// never waits for teardown.
    pub fn release(&self) {
        self.entry.release(self.id);
    }

    /// Fires once the entry has been removed from the index.
    pub fn forgotten(&self) -> Signal {
        self.entry.forgotten.clone()
    }

    /// Fires once the entry's backing file has been deleted.
    pub fn evicted(&self) -> Signal {
        self.entry.evicted.clone()
    }
}

impl Drop for BlobRef {
    fn drop(&mut self) {
        self.release();
    }
}

/// A bounded reader over a cached blob that holds a reference until it
/// reaches EOF, hits an error, or is dropped.
#[derive(Debug)]
pub struct BlobReader {
    inner: Take<File>,
    reference: Option<BlobRef>,
}

impl BlobReader {
    fn finish(&mut self) {
        if let Some(reference) = self.reference.take() {
            reference.release();
        }
    }
}

impl AsyncRead for BlobReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let wanted = buf.remaining();
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        match &poll {
            Poll::Ready(Ok(())) if wanted > 0 && buf.filled().len() == before => self.finish(),
            Poll::Ready(Err(_)) => self.finish(),
            _ => {}
        }
        poll
    }
}

#[derive(Debug)]
struct BlobCacheInner {
    dir: PathBuf,
    entries: RwLock<HashMap<String, Arc<BlobEntry>>>,
    locks: KeyedLocks<String>,
}

#[derive(Debug, Clone)]
pub struct BlobCache {
    inner: Arc<BlobCacheInner>,
}

impl BlobCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(BlobCacheInner {
                dir: dir.into(),
                entries: RwLock::new(HashMap::new()),
                locks: KeyedLocks::new(),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Path of the backing file for `hash`.
    pub fn blob_path(&self, hash: &str) -> PathBuf {
        self.inner.dir.join(hash)
    }

    /// Stream `reader` to disk, digesting it on the way, and return the
    /// first reference to the resulting blob.
    ///
    /// Content that is already cached yields a new reference to the live
    /// entry. If that entry is being torn down, this waits until its file is
    /// gone and then registers a fresh one.
    pub async fn store<R>(&self, mut reader: R) -> Result<BlobRef, BlobCacheError>
    where
        R: AsyncRead + Unpin + Send,
    {
        fs::create_dir_all(&self.inner.dir).await?;

        let temp_path = self.inner.dir.join(format!("{}.tmp", Uuid::new_v4()));
        let hash = match Self::write_temp(&temp_path, &mut reader).await {
            Ok(hash) => hash,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
        };

        loop {
            let guard = self.inner.locks.lock(&hash).await;
            let existing = self.inner.entries.read().get(&hash).cloned();

            match existing {
                Some(entry) => match entry.hold(false) {
                    Some(reference) => {
                        drop(guard);
                        fs::remove_file(&temp_path).await?;
                        tracing::debug!(hash = %hash, "blob already cached");
                        return Ok(reference);
                    }
                    None => {
                        drop(guard);
                        entry.evicted.wait().await;
                    }
                },
                None => {
                    let final_path = self.blob_path(&hash);
                    if let Err(e) = fs::rename(&temp_path, &final_path).await {
                        let _ = fs::remove_file(&temp_path).await;
                        return Err(e.into());
                    }

                    let entry = Arc::new(BlobEntry::new(hash.clone(), final_path));
                    let reference = entry.hold(true).ok_or_else(|| {
                        std::io::Error::other("new blob entry refused its first reference")
                    })?;
                    self.inner
                        .entries
                        .write()
                        .insert(hash.clone(), entry.clone());
                    self.spawn_teardown(entry);

                    tracing::debug!(hash = %hash, "blob stored");
                    return Ok(reference);
                }
            }
        }
    }

    async fn write_temp<R>(path: &Path, reader: &mut R) -> std::io::Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut file = File::create(path).await?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        Ok(hasher.finalize().to_hex().to_string())
    }

    fn spawn_teardown(&self, entry: Arc<BlobEntry>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            entry.released.wait().await;

            let _guard = inner.locks.lock(&entry.hash).await;
            {
                let mut entries = inner.entries.write();
                if entries
                    .get(&entry.hash)
                    .is_some_and(|current| Arc::ptr_eq(current, &entry))
                {
                    entries.remove(&entry.hash);
                }
            }
            entry.forgotten.fire();

            if let Err(e) = fs::remove_file(&entry.path).await {
                tracing::warn!(hash = %entry.hash, error = %e, "failed to delete evicted blob");
            }
            entry.evicted.fire();
            tracing::debug!(hash = %entry.hash, "blob evicted");
        });
    }

    /// A new reference to a live blob, or `None` if it is absent or being
    /// torn down.
    pub fn hold(&self, hash: &str) -> Option<BlobRef> {
        let entry = self.inner.entries.read().get(hash).cloned()?;
        entry.hold(false)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.inner.entries.read().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A reader over `size` bytes of the blob starting at `offset`.
    pub async fn get(
        &self,
        hash: &str,
        offset: u64,
        size: u64,
    ) -> Result<Option<BlobReader>, BlobCacheError> {
        let Some(reference) = self.hold(hash) else {
            return Ok(None);
        };

        let mut file = File::open(&reference.entry.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        Ok(Some(BlobReader {
            inner: file.take(size),
            reference: Some(reference),
        }))
    }

    /// Fill `buf` from the blob starting at `offset`. Returns the number of
    /// bytes read, or `None` when the blob is not cached.
    pub async fn get_bytes(
        &self,
        hash: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<Option<usize>, BlobCacheError> {
        let Some(mut reader) = self.get(hash, offset, buf.len() as u64).await? else {
            return Ok(None);
        };

        let mut filled = 0;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(Some(filled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn wait(signal: Signal) {
        tokio::time::timeout(Duration::from_secs(5), signal.wait())
            .await
            .expect("signal did not fire");
    }

    #[tokio::test]
    async fn test_store_get_and_evict() {
        let temp = TempDir::new().unwrap();
        let cache = BlobCache::new(temp.path());

        let reference = cache.store(&b"hello blob"[..]).await.unwrap();
        let hash = reference.hash().to_string();
        assert!(!hash.is_empty());
        assert!(cache.blob_path(&hash).exists());

        let mut buf = [0u8; 4];
        let n = cache.get_bytes(&hash, 6, &mut buf).await.unwrap();
        assert_eq!(n, Some(4));
        assert_eq!(&buf, b"blob");

        let forgotten = reference.forgotten();
        let evicted = reference.evicted();
        reference.release();

        wait(forgotten).await;
        assert!(cache.hold(&hash).is_none());
        wait(evicted).await;
        assert!(!cache.blob_path(&hash).exists());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_same_content_shares_an_entry() {
        let temp = TempDir::new().unwrap();
        let cache = BlobCache::new(temp.path());

        let first = cache.store(&b"same"[..]).await.unwrap();
        let second = cache.store(&b"same"[..]).await.unwrap();
        assert_eq!(first.hash(), second.hash());
        assert_eq!(cache.len(), 1);

        first.release();
        assert!(cache.hold(second.hash()).is_some());
    }

    #[tokio::test]
    async fn test_reader_releases_at_eof() {
        let temp = TempDir::new().unwrap();
        let cache = BlobCache::new(temp.path());

        let reference = cache.store(&b"0123456789"[..]).await.unwrap();
        let hash = reference.hash().to_string();
        let evicted = reference.evicted();

        let mut reader = cache.get(&hash, 2, 3).await.unwrap().unwrap();
        reference.release();
        assert!(!evicted.is_fired());

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"234");

        wait(evicted).await;
    }

    #[tokio::test]
    async fn test_store_waits_out_teardown() {
        let temp = TempDir::new().unwrap();
        let cache = BlobCache::new(temp.path());

        let reference = cache.store(&b"again"[..]).await.unwrap();
        let hash = reference.hash().to_string();
        drop(reference);

        let fresh = cache.store(&b"again"[..]).await.unwrap();
        assert_eq!(fresh.hash(), hash);
        assert!(cache.blob_path(&hash).exists());
        assert!(cache.hold(&hash).is_some());
    }
}
