use std::path::PathBuf;

use clap::Args;
use url::Url;

use puterfs::state::{AppConfig, AppState, StateError, DEFAULT_API_URL};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Base URL of the storage API
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub url: Url,

    /// Auth token (see `puterfs login` to obtain one)
    #[arg(long)]
    pub token: Option<String>,

    /// Where `puterfs mount` mounts by default
    #[arg(long, default_value = "/tmp/mnt")]
    pub mount_point: PathBuf,

    /// Enable the read and write caches by default
    #[arg(long)]
    pub experimental_cache: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            url: self.url.to_string(),
            token: self.token.clone(),
            mount_point: self.mount_point.clone(),
            experimental_cache: self.experimental_cache,
            ..Default::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let output = format!(
            "Initialized puterfs directory at: {}\n\
             - Config: {}\n\
             - API: {}\n\
             - Mount point: {}\n\
             - Cache directory: {}\n\
             - Token: {}",
            state.state_dir.display(),
            state.config_path.display(),
            state.config.url,
            state.config.mount_point.display(),
            state.config.cache_dir.display(),
            if state.config.token.is_some() {
                "set"
            } else {
                "not set (run 'puterfs login')"
            }
        );

        Ok(output)
    }
}
