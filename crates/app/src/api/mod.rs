//! HTTP client for the Puter storage API.
//!
//! [`ApiClient`] speaks the JSON endpoints through [`ApiRequest`] and
//! implements the engine's `RemoteStorage` on top of them.

#[allow(clippy::module_inception)]
mod client;
mod error;
mod remote;
pub mod requests;

pub use client::ApiClient;
pub use error::ApiError;

use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;

pub trait ApiRequest {
    type Response: DeserializeOwned;

    /// Endpoint name, appended to the client's base URL.
    const ENDPOINT: &'static str;

    fn build_request(self, url: Url, client: &Client) -> RequestBuilder;
}
