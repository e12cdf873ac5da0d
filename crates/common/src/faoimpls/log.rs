use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::fao::{ByteStream, FsOps, NodeInfo, Result};

/// Traces every call entering the pipeline and how it ended.
pub struct LogFao {
    delegate: Arc<dyn FsOps>,
}

impl LogFao {
    pub fn new(delegate: Arc<dyn FsOps>) -> Self {
        Self { delegate }
    }
}

fn finished<T>(op: &'static str, subject: &dyn Display, started: Instant, result: &Result<T>) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => tracing::debug!(op, %subject, elapsed_ms, "fs call completed"),
        Err(e) if e.is_expected() => {
            tracing::debug!(op, %subject, elapsed_ms, error = %e, "fs call failed")
        }
        Err(e) => tracing::warn!(op, %subject, elapsed_ms, error = %e, "fs call failed"),
    }
}

macro_rules! traced {
    ($op:literal, $subject:expr, $call:expr) => {{
        let subject = $subject;
        tracing::debug!(op = $op, %subject, "fs call");
        let started = Instant::now();
        let result = $call.await;
        finished($op, &subject, started, &result);
        result
    }};
}

#[async_trait]
impl FsOps for LogFao {
    async fn stat(&self, path: &str) -> Result<Option<NodeInfo>> {
        traced!("stat", path, self.delegate.stat(path))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<NodeInfo>> {
        traced!("read_dir", path, self.delegate.read_dir(path))
    }

    async fn read(&self, path: &str, dest: &mut [u8], offset: u64) -> Result<usize> {
        let subject = format!("{} [{}+{}]", path, offset, dest.len());
        traced!("read", subject, self.delegate.read(path, dest, offset))
    }

    async fn write(&self, path: &str, src: &[u8], offset: u64) -> Result<usize> {
        let subject = format!("{} [{}+{}]", path, offset, src.len());
        traced!("write", subject, self.delegate.write(path, src, offset))
    }

    async fn create(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        let subject = format!("{} / {}", parent, name);
        traced!("create", subject, self.delegate.create(parent, name))
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let subject = format!("{} to {}", path, size);
        traced!("truncate", subject, self.delegate.truncate(path, size))
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        let subject = format!("{} / {}", parent, name);
        traced!("mkdir", subject, self.delegate.mkdir(parent, name))
    }

    async fn symlink(&self, parent: &str, name: &str, target: &str) -> Result<NodeInfo> {
        let subject = format!("{} / {} -> {}", parent, name, target);
        traced!("symlink", subject, self.delegate.symlink(parent, name, target))
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        traced!("unlink", path, self.delegate.unlink(path))
    }

    async fn mv(&self, source: &str, parent: &str, name: &str) -> Result<()> {
        let subject = format!("{} -> {} / {}", source, parent, name);
        traced!("mv", subject, self.delegate.mv(source, parent, name))
    }

    async fn read_all(&self, path: &str) -> Result<ByteStream> {
        traced!("read_all", path, self.delegate.read_all(path))
    }
}
