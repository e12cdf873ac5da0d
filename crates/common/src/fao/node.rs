use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::time::Instant;

use crate::engine::ROOT_ID;

/// One filesystem entry as reported by the remote service.
///
/// `local_id` and `last_stat` are process-local and never cross the wire:
/// the former is assigned by the local-id stage of the pipeline, the latter
/// is stamped by the tree cache when the entry is observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default, deserialize_with = "nullable")]
    pub path: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(rename = "uid", default, deserialize_with = "nullable")]
    pub remote_id: String,
    #[serde(skip)]
    pub local_id: String,
    #[serde(default, deserialize_with = "int_bool")]
    pub is_dir: bool,
    #[serde(default, deserialize_with = "int_bool")]
    pub is_symlink: bool,
    #[serde(default)]
    pub symlink_path: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub modified: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub created: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub accessed: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: Option<String>,
    #[serde(skip)]
    pub last_stat: Option<Instant>,
}

impl NodeInfo {
    /// The mount root. It always exists and is never fetched remotely.
    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
            local_id: ROOT_ID.to_string(),
            is_dir: true,
            ..Default::default()
        }
    }
}

/// The service reports booleans as either JSON booleans or 0/1 integers.
fn int_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntBool {
        Bool(bool),
        Int(i64),
    }

    match Option::<IntBool>::deserialize(deserializer)? {
        None => Ok(false),
        Some(IntBool::Bool(b)) => Ok(b),
        Some(IntBool::Int(0)) => Ok(false),
        Some(IntBool::Int(1)) => Ok(true),
        Some(IntBool::Int(n)) => Err(D::Error::custom(format!(
            "invalid bool or integer for bool: {}",
            n
        ))),
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
