use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tokio::runtime::Handle;
use url::Url;

use common::prelude::{Engine, MemRemote, Pipeline, RemoteStorage};
use puterfs::fuse::{self, PuterFs};
use puterfs::process;
use puterfs::state::{AppConfig, AppState, StateError};
use puterfs::ApiClient;

#[derive(Args, Debug, Clone)]
pub struct Mount {
    /// Directory to mount at (overrides config)
    #[arg(long)]
    pub mount_point: Option<PathBuf>,

    /// Base URL of the storage API (overrides config)
    #[arg(long)]
    pub url: Option<String>,

    /// Auth token (overrides config)
    #[arg(long)]
    pub token: Option<String>,

    /// Directory for cached file contents (overrides config)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Enable the read and write caches
    #[arg(long)]
    pub experimental_cache: bool,

    /// Serve an in-memory store instead of the remote service
    #[arg(long)]
    pub test_mode: bool,

    /// Log level: trace, debug, info, warn or error (overrides config)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Also write daily-rolling logs to this directory (overrides config)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("mount failed: {0:#}")]
    Failed(#[from] anyhow::Error),
}

impl Mount {
    /// Layer the command-line flags over the loaded configuration.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(mount_point) = &self.mount_point {
            config.mount_point = mount_point.clone();
        }
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(log_dir) = &self.log_dir {
            config.log_dir = Some(log_dir.clone());
        }
        config.experimental_cache |= self.experimental_cache;
        config.test_mode |= self.test_mode;
    }
}

fn build_remote(config: &AppConfig) -> anyhow::Result<Arc<dyn RemoteStorage>> {
    if config.test_mode {
        tracing::warn!(
            delay_ms = config.test_delay_ms,
            "test mode: serving an in-memory store"
        );
        let remote = MemRemote::new().with_latency(Duration::from_millis(config.test_delay_ms));
        return Ok(Arc::new(remote));
    }

    let url =
        Url::parse(&config.url).with_context(|| format!("invalid API url {}", config.url))?;
    let token = config
        .token
        .as_deref()
        .context("no auth token configured; run 'puterfs login' first")?;
    Ok(Arc::new(ApiClient::new(&url, Some(token))?))
}

/// Mount, then block until SIGINT or SIGTERM.
async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let engine = Engine::new(config.engine_config(), build_remote(config)?);

    let pipeline =
        Pipeline::remote(&engine).with_layers(Pipeline::standard(config.experimental_cache));
    tracing::info!(layers = ?pipeline.layers(), "pipeline assembled");
    let ops = pipeline.build();

    std::fs::create_dir_all(&config.mount_point).with_context(|| {
        format!(
            "failed to create mount point {}",
            config.mount_point.display()
        )
    })?;

    let (shutdown, _shutdown_tx, _shutdown_rx) =
        process::graceful_shutdown_blocker().context("failed to install signal handlers")?;

    let fs = PuterFs::new(Handle::current(), ops, engine.associations().clone());
    let session = fuse::mount(fs, &config.mount_point)
        .with_context(|| format!("failed to mount at {}", config.mount_point.display()))?;
    tracing::info!(mount_point = %config.mount_point.display(), "mounted");

    let _ = shutdown.await;

    tracing::info!(mount_point = %config.mount_point.display(), "unmounting");
    drop(session);
    engine.shutdown().await;
    Ok(())
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mount {
    type Error = MountError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = match AppState::load(ctx.config_path.clone()) {
            Ok(state) => state.config,
            Err(StateError::NotInitialized) => AppConfig::default(),
            Err(e) => return Err(e.into()),
        };
        self.apply(&mut config);

        let level = config.log_level()?;
        let _guards = process::init_logging(level, config.log_dir.as_deref());

        run(&config).await?;

        Ok(format!("Unmounted {}", config.mount_point.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> Mount {
        Mount {
            mount_point: None,
            url: None,
            token: None,
            cache_dir: None,
            experimental_cache: false,
            test_mode: false,
            log_level: None,
            log_dir: None,
        }
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = AppConfig {
            token: Some("from-file".to_string()),
            ..Default::default()
        };
        let mount = Mount {
            mount_point: Some(PathBuf::from("/mnt/puter")),
            token: Some("from-flag".to_string()),
            experimental_cache: true,
            ..flags()
        };
        mount.apply(&mut config);

        assert_eq!(config.mount_point, PathBuf::from("/mnt/puter"));
        assert_eq!(config.token.as_deref(), Some("from-flag"));
        assert!(config.experimental_cache);
        assert!(!config.test_mode);
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let mut config = AppConfig {
            experimental_cache: true,
            log_level: "debug".to_string(),
            ..Default::default()
        };
        flags().apply(&mut config);
        assert!(config.experimental_cache);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_remote_requires_token() {
        let config = AppConfig::default();
        let err = build_remote(&config).err().unwrap();
        assert!(err.to_string().contains("puterfs login"));

        let config = AppConfig {
            test_mode: true,
            ..Default::default()
        };
        assert!(build_remote(&config).is_ok());
    }
}
