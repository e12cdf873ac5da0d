use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::signal::Signal;
use crate::fao::{FaoError, Result};
use crate::remote::RemoteStorage;

/// One remote operation descriptor, e.g. `{"op": "write", "path": .., "name": ..}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Operation(Map<String, Value>);

impl Operation {
    pub fn new(op: &str) -> Self {
        Self::default().with("op", op)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Write the attached blob to `parent/name`.
    pub fn write(parent: &str, name: &str, overwrite: bool) -> Self {
        Self::new("write")
            .with("path", parent)
            .with("name", name)
            .with("overwrite", overwrite)
            .with("dedupe_name", false)
    }

    pub fn mkdir(parent: &str, name: &str) -> Self {
        Self::new("mkdir").with("parent", parent).with("path", name)
    }

    pub fn symlink(parent: &str, name: &str, target: &str) -> Self {
        Self::new("symlink")
            .with("path", parent)
            .with("name", name)
            .with("target", target)
    }

    pub fn op(&self) -> Option<&str> {
        self.get_str("op")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Operation {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

struct PendingOperation {
    operation: Operation,
    blob: Option<Bytes>,
    reply: oneshot::Sender<Result<Value>>,
}

struct BatcherInner {
    queue: flume::Sender<PendingOperation>,
    full: Arc<Notify>,
    stop: Signal,
    task: Mutex<Option<JoinHandle<()>>>,
    max_batch: usize,
    timeout: Duration,
}

/// Coalesces mutating remote operations from concurrent callers into
/// batched remote calls.
///
/// A drain task flushes when the queue reaches `max_batch` or on each
/// `flush_interval` tick with work queued. Results are handed back by
/// position: the i-th operation of a batch receives the i-th result.
#[derive(Clone)]
pub struct OperationBatcher {
    inner: Arc<BatcherInner>,
}

impl std::fmt::Debug for OperationBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationBatcher")
            .field("queued", &self.inner.queue.len())
            .field("max_batch", &self.inner.max_batch)
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

impl OperationBatcher {
    /// Create the batcher and spawn its drain task on the current runtime.
    pub fn new(
        remote: Arc<dyn RemoteStorage>,
        max_batch: usize,
        flush_interval: Duration,
        timeout: Duration,
    ) -> Self {
        let max_batch = max_batch.max(1);
        let (queue, pending) = flume::bounded(max_batch);
        let full = Arc::new(Notify::new());
        let stop = Signal::new();

        let task = tokio::spawn(drain(
            pending,
            remote,
            max_batch,
            flush_interval,
            full.clone(),
            stop.clone(),
        ));

        Self {
            inner: Arc::new(BatcherInner {
                queue,
                full,
                stop,
                task: Mutex::new(Some(task)),
                max_batch,
                timeout,
            }),
        }
    }

    /// Queue `operation` (with an optional payload) and wait for its result.
    ///
    /// Fails with [`FaoError::Timeout`] when the result does not arrive within
    /// the request timeout, and with [`FaoError::Transport`] when the batch
    /// carrying it failed.
    pub async fn enqueue(&self, operation: Operation, blob: Option<Bytes>) -> Result<Value> {
        let (reply, result) = oneshot::channel();
        let pending = PendingOperation {
            operation,
            blob,
            reply,
        };

        let wait = async {
            self.inner
                .queue
                .send_async(pending)
                .await
                .map_err(|_| FaoError::Transport("operation batcher has shut down".into()))?;
            if self.inner.queue.len() >= self.inner.max_batch {
                self.inner.full.notify_one();
            }
            result
                .await
                .map_err(|_| FaoError::Transport("batch dropped before completing".into()))?
        };

        tokio::time::timeout(self.inner.timeout, wait)
            .await
            .map_err(|_| FaoError::Timeout(self.inner.timeout))?
    }

    /// Number of operations waiting for the next flush.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Flush whatever is queued, then stop the drain task.
    pub async fn shutdown(&self) {
        self.inner.stop.fire();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("operation batcher task failed: {}", e);
            }
        }
    }
}

async fn drain(
    pending: flume::Receiver<PendingOperation>,
    remote: Arc<dyn RemoteStorage>,
    max_batch: usize,
    flush_interval: Duration,
    full: Arc<Notify>,
    stop: Signal,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let stopping = tokio::select! {
            _ = ticker.tick() => false,
            _ = full.notified() => false,
            _ = stop.wait() => true,
        };

        loop {
            let batch: Vec<_> = pending.try_iter().take(max_batch).collect();
            if batch.is_empty() {
                break;
            }
            let drained = batch.len();
            flush(remote.as_ref(), batch).await;
            if !stopping && drained < max_batch {
                break;
            }
        }

        if stopping || pending.is_disconnected() {
            tracing::debug!("operation batcher stopped");
            return;
        }
    }
}

async fn flush(remote: &dyn RemoteStorage, batch: Vec<PendingOperation>) {
    let count = batch.len();
    let mut operations = Vec::with_capacity(count);
    let mut blobs = Vec::new();
    let mut replies = Vec::with_capacity(count);
    for pending in batch {
        operations.push(pending.operation);
        blobs.extend(pending.blob);
        replies.push(pending.reply);
    }

    tracing::debug!(operations = count, blobs = blobs.len(), "flushing batch");

    match remote.batch(operations, blobs).await {
        Ok(results) => {
            if results.len() < count {
                tracing::error!(
                    expected = count,
                    received = results.len(),
                    "batch response is missing results"
                );
            }
            let received = results.len();
            let mut results = results.into_iter();
            for (index, reply) in replies.into_iter().enumerate() {
                let result = results.next().ok_or_else(|| {
                    FaoError::ProtocolViolation(format!(
                        "batch response has {} results, operation {} has none",
                        received, index
                    ))
                });
                // The caller may have timed out and gone away.
                let _ = reply.send(result);
            }
        }
        Err(e) => {
            tracing::error!(operations = count, "batch request failed: {}", e);
            let message = e.to_string();
            for reply in replies {
                let _ = reply.send(Err(FaoError::Transport(message.clone())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_descriptors() {
        let write = serde_json::to_value(Operation::write("/dir", "f.txt", true)).unwrap();
        assert_eq!(
            write,
            json!({
                "op": "write",
                "path": "/dir",
                "name": "f.txt",
                "overwrite": true,
                "dedupe_name": false,
            })
        );

        let mkdir = Operation::mkdir("/dir", "sub");
        assert_eq!(mkdir.op(), Some("mkdir"));
        assert_eq!(mkdir.get_str("parent"), Some("/dir"));
        assert_eq!(mkdir.get_str("path"), Some("sub"));

        let symlink = Operation::symlink("/dir", "link", "/target");
        assert_eq!(symlink.get_str("target"), Some("/target"));
    }
}
