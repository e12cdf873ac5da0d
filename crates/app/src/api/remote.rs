use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::Value;
use tokio_util::io::StreamReader;

use common::engine::Operation;
use common::fao::{path, ByteStream, FaoError, NodeInfo, Result};
use common::faoimpls::decode_result;
use common::remote::RemoteStorage;

use super::client::ApiClient;
use super::error::ApiError;
use super::requests::{BatchRequest, DeleteRequest, MoveRequest, ReadDirRequest, StatRequest};

impl ApiClient {
    async fn get_read(&self, file_path: &str) -> std::result::Result<reqwest::Response, ApiError> {
        let response = self
            .http_client()
            .get(self.endpoint("read"))
            .query(&[("path", file_path)])
            .send()
            .await?;
        Self::check(response).await
    }
}

#[async_trait]
impl RemoteStorage for ApiClient {
    async fn stat(&self, path: &str) -> Result<Option<NodeInfo>> {
        match self.call(StatRequest::new(path)).await {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into_fao(path)),
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<NodeInfo>> {
        self.call(ReadDirRequest {
            path: path.to_string(),
        })
        .await
        .map_err(|e| e.into_fao(path))
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        let response = self.get_read(path).await.map_err(|e| e.into_fao(path))?;
        response
            .bytes()
            .await
            .map_err(|e| ApiError::from(e).into_fao(path))
    }

    async fn read_stream(&self, path: &str) -> Result<ByteStream> {
        let response = self.get_read(path).await.map_err(|e| e.into_fao(path))?;
        let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
        Ok(Box::new(StreamReader::new(body)))
    }

    async fn batch(&self, operations: Vec<Operation>, blobs: Vec<Bytes>) -> Result<Vec<Value>> {
        let count = operations.len();
        let request = BatchRequest::new(&operations, blobs).map_err(|e| e.into_fao("batch"))?;
        let response = self.call(request).await.map_err(|e| e.into_fao("batch"))?;
        tracing::debug!(
            operations = count,
            results = response.results.len(),
            "batch request complete"
        );
        Ok(response.results)
    }

    async fn symlink(&self, link_path: &str, target: &str) -> Result<NodeInfo> {
        let operation = Operation::symlink(
            &path::parent(link_path),
            &path::base_name(link_path),
            target,
        );
        let mut results = self.batch(vec![operation], Vec::new()).await?;
        if results.len() != 1 {
            tracing::error!(
                path = link_path,
                results = results.len(),
                "symlink batch returned an unexpected number of results"
            );
            return Err(FaoError::ProtocolViolation(format!(
                "expected one result for symlink {}, got {}",
                link_path,
                results.len()
            )));
        }
        decode_result(results.remove(0), link_path)
    }

    async fn move_to(&self, source: &str, parent: &str, name: &str) -> Result<()> {
        self.call(MoveRequest {
            source_path: source.to_string(),
            dest_path: parent.to_string(),
            new_name: name.to_string(),
        })
        .await
        .map_err(|e| e.into_fao(source))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.call(DeleteRequest {
            paths: vec![path.to_string()],
        })
        .await
        .map_err(|e| e.into_fao(path))?;
        Ok(())
    }
}
