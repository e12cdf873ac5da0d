use std::time::Duration;
use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use common::engine::EngineConfig;

pub const APP_NAME: &str = "puterfs";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default API endpoint of the hosted service
pub const DEFAULT_API_URL: &str = "https://api.puter.com";
/// Default web host, where `/login` lives
pub const DEFAULT_HOST_URL: &str = "https://puter.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the storage API
    #[serde(default = "default_url")]
    pub url: String,
    /// Bearer token for the storage API
    #[serde(default)]
    pub token: Option<String>,
    /// Where the filesystem is mounted
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,
    /// Directory holding cached file contents
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_ttl_ms")]
    pub tree_cache_ttl_ms: u64,
    #[serde(default = "default_ttl_ms")]
    pub file_read_cache_ttl_ms: u64,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Enable the read and write caches
    #[serde(default)]
    pub experimental_cache: bool,
    /// Serve an in-memory store instead of the remote service
    #[serde(default)]
    pub test_mode: bool,
    /// Artificial latency of the in-memory store
    #[serde(default = "default_test_delay_ms")]
    pub test_delay_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Write daily-rolling log files here as well as to stdout
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_mount_point() -> PathBuf {
    PathBuf::from("/tmp/mnt")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/tmp/puterfs")
}

fn default_ttl_ms() -> u64 {
    5000
}

fn default_max_batch() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    200
}

fn default_request_timeout_ms() -> u64 {
    20000
}

fn default_test_delay_ms() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: None,
            mount_point: default_mount_point(),
            cache_dir: default_cache_dir(),
            tree_cache_ttl_ms: default_ttl_ms(),
            file_read_cache_ttl_ms: default_ttl_ms(),
            max_batch: default_max_batch(),
            flush_interval_ms: default_flush_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            experimental_cache: false,
            test_mode: false,
            test_delay_ms: default_test_delay_ms(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Engine settings derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tree_ttl: Duration::from_millis(self.tree_cache_ttl_ms),
            read_ttl: Duration::from_millis(self.file_read_cache_ttl_ms),
            max_batch: self.max_batch.max(1),
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            cache_dir: self.cache_dir.clone(),
        }
    }

    pub fn log_level(&self) -> Result<tracing::Level, StateError> {
        self.log_level
            .parse()
            .map_err(|_| StateError::InvalidLogLevel(self.log_level.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.puterfs)
    pub state_dir: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.puterfs)
    pub fn state_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom_path)?;
        let config_path = state_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&state_dir)?;

        let state = Self {
            state_dir,
            config_path,
            config: config.unwrap_or_default(),
        };
        state.save()?;
        Ok(state)
    }

    /// Load existing state from the state directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom_path)?;
        let config_path = state_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            state_dir,
            config_path,
            config,
        })
    }

    /// Load existing state, or initialize it with defaults when missing
    pub fn load_or_init(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        match Self::load(custom_path.clone()) {
            Err(StateError::NotInitialized) => Self::init(custom_path, None),
            other => other,
        }
    }

    /// Write the current configuration back to disk
    pub fn save(&self) -> Result<(), StateError> {
        let config_toml = toml::to_string_pretty(&self.config)?;
        fs::write(&self.config_path, config_toml)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("puterfs directory not initialized. Run 'puterfs init' first")]
    NotInitialized,

    #[error("puterfs directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn test_init_then_load() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state");

        let config = AppConfig {
            token: Some("secret".to_string()),
            ..Default::default()
        };
        AppState::init(Some(dir.clone()), Some(config.clone())).unwrap();

        let state = AppState::load(Some(dir.clone())).unwrap();
        assert_eq!(state.config, config);
        assert!(matches!(
            AppState::init(Some(dir), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_missing_state() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            AppState::load(Some(temp.path().join("nope"))),
            Err(StateError::NotInitialized)
        ));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "token = \"abc\"\nexperimental_cache = true\n",
        )
        .unwrap();

        let state = AppState::load(Some(temp.path().to_path_buf())).unwrap();
        assert_eq!(state.config.token.as_deref(), Some("abc"));
        assert!(state.config.experimental_cache);
        assert_eq!(state.config.url, DEFAULT_API_URL);
        assert_eq!(state.config.max_batch, 100);
        assert_eq!(state.config.mount_point, PathBuf::from("/tmp/mnt"));
    }

    #[test]
    fn test_engine_config_conversion() {
        let config = AppConfig {
            tree_cache_ttl_ms: 0,
            flush_interval_ms: 50,
            max_batch: 0,
            ..Default::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.tree_ttl, Duration::ZERO);
        assert_eq!(engine.flush_interval, Duration::from_millis(50));
        assert_eq!(engine.max_batch, 1);
        assert_eq!(engine.request_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = AppConfig::default();
        assert_eq!(config.log_level().unwrap(), tracing::Level::INFO);
        config.log_level = "loud".to_string();
        assert!(matches!(
            config.log_level(),
            Err(StateError::InvalidLogLevel(_))
        ));
    }
}
