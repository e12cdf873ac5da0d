use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use puterfs::state::{AppState, StateError, DEFAULT_HOST_URL};
use puterfs::{ApiClient, ApiError};

#[derive(Args, Debug, Clone)]
pub struct Login {
    /// Web host that issues session tokens
    #[arg(long, default_value = DEFAULT_HOST_URL)]
    pub host: Url,

    #[arg(long)]
    pub username: String,

    /// Password; read from stdin when omitted
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("login request failed: {0}")]
    Api(#[from] ApiError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to read password: {0}")]
    Io(#[from] std::io::Error),
    #[error("no password given")]
    EmptyPassword,
}

async fn read_password() -> Result<String, LoginError> {
    eprint!("Password: ");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(LoginError::EmptyPassword);
    }
    Ok(password)
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Login {
    type Error = LoginError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let password = match &self.password {
            Some(password) => password.clone(),
            None => read_password().await?,
        };

        let token = ApiClient::login(&self.host, &self.username, &password).await?;

        let mut state = AppState::load_or_init(ctx.config_path.clone())?;
        state.config.token = Some(token);
        state.save()?;

        Ok(format!(
            "Logged in as {}; token saved to {}",
            self.username,
            state.config_path.display()
        ))
    }
}
