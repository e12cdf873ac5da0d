use std::path::PathBuf;
use std::time::Duration;

/// Tunables shared by the caches and the batcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a directory listing and the metadata it carries stay fresh.
    pub tree_ttl: Duration,
    /// How long a cached file body stays associated with its path.
    pub read_ttl: Duration,
    pub max_batch: usize,
    pub flush_interval: Duration,
    /// Upper bound on how long a caller waits for a batched operation.
    pub request_timeout: Duration,
    pub cache_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tree_ttl: Duration::from_secs(5),
            read_ttl: Duration::from_secs(5),
            max_batch: 100,
            flush_interval: Duration::from_millis(200),
            request_timeout: Duration::from_secs(20),
            cache_dir: PathBuf::from("/tmp/puterfs"),
        }
    }
}
