//! Request and response bodies of the JSON endpoints.

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use common::engine::Operation;
use common::fao::NodeInfo;

use super::error::ApiError;
use super::ApiRequest;

/// Look up one node, by uid when the subject parses as a UUID and by path
/// otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct StatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl StatRequest {
    pub fn new(subject: &str) -> Self {
        if Uuid::parse_str(subject).is_ok() {
            Self {
                path: None,
                uid: Some(subject.to_string()),
            }
        } else {
            Self {
                path: Some(subject.to_string()),
                uid: None,
            }
        }
    }
}

impl ApiRequest for StatRequest {
    type Response = NodeInfo;
    const ENDPOINT: &'static str = "stat";

    fn build_request(self, url: Url, client: &Client) -> RequestBuilder {
        client.post(url).json(&self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadDirRequest {
    pub path: String,
}

impl ApiRequest for ReadDirRequest {
    type Response = Vec<NodeInfo>;
    const ENDPOINT: &'static str = "readdir";

    fn build_request(self, url: Url, client: &Client) -> RequestBuilder {
        client.post(url).json(&self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteRequest {
    pub paths: Vec<String>,
}

impl ApiRequest for DeleteRequest {
    type Response = IgnoredAny;
    const ENDPOINT: &'static str = "delete";

    fn build_request(self, url: Url, client: &Client) -> RequestBuilder {
        client.post(url).json(&self)
    }
}

/// Move `source_path` into the directory `dest_path`, naming it `new_name`.
#[derive(Debug, Clone, Serialize)]
pub struct MoveRequest {
    pub source_path: String,
    pub dest_path: String,
    pub new_name: String,
}

impl ApiRequest for MoveRequest {
    type Response = IgnoredAny;
    const ENDPOINT: &'static str = "move";

    fn build_request(self, url: Url, client: &Client) -> RequestBuilder {
        client.post(url).json(&self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

impl ApiRequest for LoginRequest {
    type Response = LoginResponse;
    const ENDPOINT: &'static str = "login";

    fn build_request(self, url: Url, client: &Client) -> RequestBuilder {
        client.post(url).json(&self)
    }
}

/// Several operations in one multipart request.
///
/// The form carries one `operation` field per operation, then one
/// `fileinfo` field per blob, then the blobs themselves as `file` parts.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    operations: Vec<String>,
    blobs: Vec<Bytes>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<Value>,
}

impl BatchRequest {
    pub fn new(operations: &[Operation], blobs: Vec<Bytes>) -> Result<Self, ApiError> {
        let operations = operations
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { operations, blobs })
    }

    fn form(self) -> Form {
        let mut form = Form::new();
        for operation in self.operations {
            form = form.text("operation", operation);
        }
        for blob in &self.blobs {
            let info = serde_json::json!({ "name": "untitled", "size": blob.len() });
            form = form.text("fileinfo", info.to_string());
        }
        for blob in self.blobs {
            form = form.part("file", Part::bytes(Vec::from(blob)).file_name("untitled"));
        }
        form
    }
}

impl ApiRequest for BatchRequest {
    type Response = BatchResponse;
    const ENDPOINT: &'static str = "batch";

    fn build_request(self, url: Url, client: &Client) -> RequestBuilder {
        client.post(url).multipart(self.form())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_by_uid_or_path() {
        let by_uid = StatRequest::new("8c3a0e1e-6a7c-4d1b-9d8e-2c1f1f2f3a4b");
        assert_eq!(
            serde_json::to_value(&by_uid).unwrap(),
            serde_json::json!({ "uid": "8c3a0e1e-6a7c-4d1b-9d8e-2c1f1f2f3a4b" })
        );

        let by_path = StatRequest::new("/alice/Desktop");
        assert_eq!(
            serde_json::to_value(&by_path).unwrap(),
            serde_json::json!({ "path": "/alice/Desktop" })
        );
    }

    #[test]
    fn test_batch_serializes_operations_in_order() {
        let operations = vec![
            Operation::mkdir("/alice", "docs"),
            Operation::write("/alice", "a.txt", true),
        ];
        let request = BatchRequest::new(&operations, vec![Bytes::from_static(b"hi")]).unwrap();
        assert_eq!(request.operations.len(), 2);

        let first: Value = serde_json::from_str(&request.operations[0]).unwrap();
        assert_eq!(first["op"], "mkdir");
        let second: Value = serde_json::from_str(&request.operations[1]).unwrap();
        assert_eq!(second["op"], "write");
        assert_eq!(second["name"], "a.txt");
    }

    #[test]
    fn test_batch_response_tolerates_missing_results() {
        let response: BatchResponse = serde_json::from_str("{}").unwrap();
        assert!(response.results.is_empty());
    }
}
