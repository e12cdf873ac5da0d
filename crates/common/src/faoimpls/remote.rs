use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::engine::{Engine, Operation, OperationBatcher};
use crate::fao::{path, ByteStream, FaoError, FsOps, NodeInfo, Result};
use crate::remote::RemoteStorage;

/// Largest file the whole-file rewrite path will materialise in memory.
pub const MAX_REWRITE_SIZE: u64 = 4 << 30;

/// Fit `contents` to `size` bytes, zero-extending, without letting an
/// oversized request abort the process.
fn resize_for_rewrite(contents: &mut Vec<u8>, file_path: &str, size: u64) -> Result<()> {
    let too_large = || FaoError::FileTooLarge {
        path: file_path.to_string(),
        size,
    };
    if size > MAX_REWRITE_SIZE {
        return Err(too_large());
    }
    let size = usize::try_from(size).map_err(|_| too_large())?;
    if size > contents.len() {
        contents
            .try_reserve_exact(size - contents.len())
            .map_err(|_| too_large())?;
    }
    contents.resize(size, 0);
    Ok(())
}

/// The innermost stage: answers every call from the remote service.
///
/// Content changes are whole-file rewrites queued on the batcher; metadata
/// calls, deletes and moves go straight to the remote.
pub struct RemoteFao {
    remote: Arc<dyn RemoteStorage>,
    batcher: OperationBatcher,
}

impl RemoteFao {
    pub fn new(engine: &Engine) -> Self {
        Self {
            remote: engine.remote().clone(),
            batcher: engine.batcher().clone(),
        }
    }

    async fn rewrite(&self, file_path: &str, contents: Vec<u8>) -> Result<NodeInfo> {
        let operation = Operation::write(
            &path::parent(file_path),
            &path::base_name(file_path),
            true,
        );
        let result = self
            .batcher
            .enqueue(operation, Some(Bytes::from(contents)))
            .await?;
        decode_result(result, file_path)
    }
}

/// Turn one entry of a batch response into a node, or into the typed error
/// it reports.
pub fn decode_result(result: Value, subject: &str) -> Result<NodeInfo> {
    if let Some(error) = result.get("error") {
        let code = error.get("code").and_then(Value::as_str).unwrap_or("");
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(code)
            .to_string();
        return Err(match code {
            "not_found" | "subject_does_not_exist" => FaoError::NotFound(subject.to_string()),
            "item_with_same_name_exists" => FaoError::AlreadyExists(subject.to_string()),
            _ => FaoError::Transport(format!("{}: {}", subject, message)),
        });
    }

    serde_json::from_value(result).map_err(|e| {
        FaoError::ProtocolViolation(format!("malformed batch result for {}: {}", subject, e))
    })
}

#[async_trait]
impl FsOps for RemoteFao {
    async fn stat(&self, path: &str) -> Result<Option<NodeInfo>> {
        self.remote.stat(path).await
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<NodeInfo>> {
        self.remote.read_dir(path).await
    }

    async fn read(&self, path: &str, dest: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.remote.read(path).await?;
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = dest.len().min(data.len() - start);
        dest[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    async fn write(&self, path: &str, src: &[u8], offset: u64) -> Result<usize> {
        let end = offset
            .checked_add(src.len() as u64)
            .ok_or_else(|| FaoError::FileTooLarge {
                path: path.to_string(),
                size: u64::MAX,
            })?;
        if end > MAX_REWRITE_SIZE {
            return Err(FaoError::FileTooLarge {
                path: path.to_string(),
                size: end,
            });
        }

        let mut contents = self.remote.read(path).await?.to_vec();
        if (contents.len() as u64) < end {
            resize_for_rewrite(&mut contents, path, end)?;
        }
        let start = offset as usize;
        contents[start..start + src.len()].copy_from_slice(src);

        self.rewrite(path, contents).await?;
        Ok(src.len())
    }

    async fn create(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        let operation = Operation::write(parent, name, true);
        let result = self.batcher.enqueue(operation, Some(Bytes::new())).await?;
        let info = decode_result(result, &path::join(parent, name))?;

        if info.is_dir {
            tracing::error!(parent, name, "create returned a directory");
            return Err(FaoError::ProtocolViolation(format!(
                "created {}/{} is a directory",
                parent, name
            )));
        }
        if info.path.is_empty() {
            tracing::error!(parent, name, "create returned a node without a path");
            return Err(FaoError::ProtocolViolation(format!(
                "created {}/{} has no path",
                parent, name
            )));
        }
        Ok(info)
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        if size > MAX_REWRITE_SIZE {
            return Err(FaoError::FileTooLarge {
                path: path.to_string(),
                size,
            });
        }
        let mut contents = self.remote.read(path).await?.to_vec();
        if contents.len() as u64 == size {
            return Ok(());
        }
        resize_for_rewrite(&mut contents, path, size)?;
        self.rewrite(path, contents).await.map(|_| ())
    }

    async fn mkdir(&self, parent: &str, name: &str) -> Result<NodeInfo> {
        let result = self
            .batcher
            .enqueue(Operation::mkdir(parent, name), None)
            .await?;
        decode_result(result, &path::join(parent, name))
    }

    async fn symlink(&self, parent: &str, name: &str, target: &str) -> Result<NodeInfo> {
        self.remote.symlink(&path::join(parent, name), target).await
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.remote.delete(path).await
    }

    async fn mv(&self, source: &str, parent: &str, name: &str) -> Result<()> {
        self.remote.move_to(source, parent, name).await
    }

    async fn read_all(&self, path: &str) -> Result<ByteStream> {
        self.remote.read_stream(path).await
    }
}
