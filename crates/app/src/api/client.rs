use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use url::Url;

use super::error::ApiError;
use super::requests::{LoginRequest, LoginResponse};
use super::ApiRequest;

#[derive(Debug, Clone)]
pub struct ApiClient {
    pub remote: Url,
    client: Client,
}

impl ApiClient {
    /// A client for the API at `remote`, authenticating with `token` when given.
    pub fn new(remote: &Url, token: Option<&str>) -> Result<Self, ApiError> {
        let mut default_headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
            value.set_sensitive(true);
            default_headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder().default_headers(default_headers).build()?;

        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }

    /// `name` appended as a path segment of the base URL.
    pub fn endpoint(&self, name: &str) -> Url {
        let mut url = self.remote.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), name);
        url.set_path(&path);
        url
    }

    pub async fn call<T: ApiRequest>(&self, request: T) -> Result<T::Response, ApiError> {
        let request_builder = request.build_request(self.endpoint(T::ENDPOINT), &self.client);
        let response = Self::check(request_builder.send().await?).await?;
        Ok(response.json::<T::Response>().await?)
    }

    /// Pass successful responses through; turn anything else into
    /// [`ApiError::HttpStatus`] carrying the body.
    pub(crate) async fn check(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ApiError::HttpStatus(
                response.status(),
                response.text().await?,
            ))
        }
    }

    /// Exchange credentials for a session token at `<host>/login`
    pub async fn login(host: &Url, username: &str, password: &str) -> Result<String, ApiError> {
        let client = Self::new(host, None)?;
        let response: LoginResponse = client
            .call(LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        Ok(response.token)
    }

    /// Get the base URL for API requests
    pub fn base_url(&self) -> &Url {
        &self.remote
    }

    /// Get the underlying HTTP client for custom requests
    pub fn http_client(&self) -> &Client {
        &self.client
    }
}
