use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Notify;

/// A pending write of `data` at byte `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMutation {
    pub offset: u64,
    pub data: Bytes,
}

impl WriteMutation {
    pub fn new(offset: u64, data: impl Into<Bytes>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }

    /// One past the last byte this mutation writes.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.data.len() as u64)
    }

    /// Copy the part of this mutation that overlaps `buffer` (which holds the
    /// file's bytes starting at `offset`) into it. Nothing outside `buffer`
    /// is touched. Returns one past the last buffer index written, or `None`
    /// when the ranges are disjoint.
    pub fn apply_to_buffer(&self, buffer: &mut [u8], offset: u64) -> Option<usize> {
        let buffer_end = offset.saturating_add(buffer.len() as u64);
        if self.end() <= offset || self.offset >= buffer_end {
            return None;
        }

        let start = self.offset.max(offset);
        let end = self.end().min(buffer_end);

        let buffer_range = (start - offset) as usize..(end - offset) as usize;
        let data_range = (start - self.offset) as usize..(end - self.offset) as usize;
        buffer[buffer_range.clone()].copy_from_slice(&self.data[data_range]);
        Some(buffer_range.end)
    }
}

#[derive(Debug)]
struct Pending {
    id: u64,
    mutation: WriteMutation,
}

#[derive(Debug, Default)]
struct OverlayInner {
    chains: RwLock<HashMap<String, Vec<Pending>>>,
    next_id: AtomicU64,
    drained: Notify,
}

impl OverlayInner {
    fn release(&self, key: &str, id: u64) {
        let mut chains = self.chains.write();
        if let Some(chain) = chains.get_mut(key) {
            chain.retain(|pending| pending.id != id);
            if chain.is_empty() {
                chains.remove(key);
            }
        }
        drop(chains);
        self.drained.notify_waiters();
    }
}

/// Handle to one mutation in a chain. Releasing it (explicitly or by drop)
/// removes the mutation once it has been applied upstream.
#[derive(Debug)]
#[must_use = "dropping a MutationRef removes the mutation from the overlay"]
pub struct MutationRef {
    overlay: Arc<OverlayInner>,
    key: String,
    id: u64,
    released: AtomicBool,
}

impl MutationRef {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.overlay.release(&self.key, self.id);
        }
    }
}

impl Drop for MutationRef {
    fn drop(&mut self) {
        self.release();
    }
}

/// Per-file ordered chains of writes not yet confirmed by the remote,
/// applied on top of reads so local writers see their own data.
#[derive(Debug, Clone, Default)]
pub struct WriteOverlay {
    inner: Arc<OverlayInner>,
}

impl WriteOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation to `key`'s chain.
    pub fn apply_mutation(&self, key: &str, mutation: WriteMutation) -> MutationRef {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .chains
            .write()
            .entry(key.to_string())
            .or_default()
            .push(Pending { id, mutation });

        MutationRef {
            overlay: self.inner.clone(),
            key: key.to_string(),
            id,
            released: AtomicBool::new(false),
        }
    }

    /// Apply `key`'s chain, in arrival order, to a buffer holding the file's
    /// bytes from `offset`. Returns one past the highest buffer index any
    /// mutation wrote, or 0.
    pub fn apply_to_buffer(&self, key: &str, buffer: &mut [u8], offset: u64) -> usize {
        let chains = self.inner.chains.read();
        let Some(chain) = chains.get(key) else {
            return 0;
        };
        chain
            .iter()
            .filter_map(|pending| pending.mutation.apply_to_buffer(buffer, offset))
            .max()
            .unwrap_or(0)
    }

    /// The furthest byte any pending mutation on `key` reaches.
    pub fn extent(&self, key: &str) -> Option<u64> {
        let chains = self.inner.chains.read();
        chains
            .get(key)?
            .iter()
            .map(|pending| pending.mutation.end())
            .max()
    }

    pub fn pending(&self, key: &str) -> usize {
        self.inner.chains.read().get(key).map_or(0, Vec::len)
    }

    /// Wait until every mutation on `key` has been released.
    pub async fn settle(&self, key: &str) {
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.pending(key) == 0 {
                return;
            }
            drained.await;
        }
    }
}
