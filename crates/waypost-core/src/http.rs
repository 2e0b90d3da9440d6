//! HTTP implementation of [`LocationApi`].
//!
//! Every request carries `Authorization: Bearer <token>` when the
//! [`TokenProvider`] has a token. Non-2xx responses are turned into
//! [`Error::Api`] using the body's `error` or `message` field when present.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use waypost_core::http::HttpLocationApi;
//! use waypost_core::{LocationApi, StaticToken};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = HttpLocationApi::new("https://api.example.com/v1", Arc::new(StaticToken::new("t0k3n")))?;
//! let prefs = api.get_preferences().await?;
//! println!("tracking every {}s", prefs.tracking_interval);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;

use waypost_types::{DeviceInfo, LocationPreferences, LocationSample};

use crate::api::{HistoryPage, HistoryQuery, LocationApi, RecordLocationRequest, SessionStartResponse};
use crate::error::Error;
use crate::traits::TokenProvider;

/// Error type for HTTP client operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    /// The backend is not reachable.
    #[error("Backend not reachable at {url}: {source}")]
    NotReachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// API returned an error response.
    #[error("API error: {message}")]
    ApiError { status: u16, message: String },
}

impl From<ApiClientError> for Error {
    fn from(err: ApiClientError) -> Self {
        match err {
            ApiClientError::NotReachable { source, .. } | ApiClientError::Request(source)
                if source.is_timeout() =>
            {
                Error::timeout("backend request", Duration::ZERO)
            }
            ApiClientError::NotReachable { url, source } => {
                Error::network(format!("{}: {}", url, source))
            }
            ApiClientError::Request(source) if source.is_decode() => {
                Error::Unknown(format!("invalid response body: {}", source))
            }
            ApiClientError::Request(source) => Error::network(source.to_string()),
            ApiClientError::InvalidUrl(url) => Error::invalid_config(url),
            ApiClientError::ApiError { status, message } => Error::api(status, message),
        }
    }
}

/// Result type for HTTP client operations.
pub type Result<T> = std::result::Result<T, ApiClientError>;

/// [`LocationApi`] over HTTP with reqwest.
#[derive(Clone)]
pub struct HttpLocationApi {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for HttpLocationApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLocationApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpLocationApi {
    /// Create a client with a 10 second request timeout.
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::with_timeout(base_url, tokens, Duration::from_secs(10))
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(
        base_url: &str,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiClientError::Request)?;
        Self::with_client(base_url, tokens, client)
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(base_url: &str, tokens: Arc<dyn TokenProvider>, client: Client) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // ======================================================================
    // Internal HTTP helpers
    // ======================================================================

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<reqwest::Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| ApiClientError::NotReachable {
                url: url.to_string(),
                source: e,
            })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(path);
        let response = self.send(&url, self.client.get(&url).query(query)).await?;
        handle_response(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let response = self.send(&url, self.client.post(&url).json(body)).await?;
        handle_response(response).await
    }

    async fn post_no_content<B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> Result<()> {
        let url = self.url(path);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = self.send(&url, request).await?;
        handle_empty(response).await
    }

    async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let response = self.send(&url, self.client.put(&url).json(body)).await?;
        handle_response(response).await
    }
}

#[async_trait]
impl LocationApi for HttpLocationApi {
    async fn start_session(&self, device: &DeviceInfo) -> crate::Result<String> {
        let response: SessionStartResponse = self.post_json("/session/start", device).await?;
        Ok(response.session_id)
    }

    async fn end_session(&self, session_id: &str) -> crate::Result<()> {
        let path = format!("/session/{}/end", session_id);
        self.post_no_content::<()>(&path, None).await?;
        Ok(())
    }

    async fn record_location(&self, sample: &LocationSample, session_id: &str) -> crate::Result<()> {
        let body = RecordLocationRequest { sample, session_id };
        self.post_no_content("/location/record", Some(&body)).await?;
        Ok(())
    }

    async fn get_preferences(&self) -> crate::Result<LocationPreferences> {
        Ok(self.get("/preferences", &[]).await?)
    }

    async fn update_preferences(
        &self,
        preferences: &LocationPreferences,
    ) -> crate::Result<LocationPreferences> {
        Ok(self.put_json("/preferences", preferences).await?)
    }

    async fn history(&self, query: &HistoryQuery) -> crate::Result<HistoryPage> {
        Ok(self.get("/history", &query.to_query_pairs()).await?)
    }

    async fn current(&self) -> crate::Result<Option<LocationSample>> {
        Ok(self.get("/current", &[]).await?)
    }
}

fn normalize_base_url(base_url: &str) -> Result<String> {
    // Normalize URL (remove trailing slash)
    let base_url = base_url.trim().trim_end_matches('/').to_string();

    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ApiClientError::InvalidUrl(format!(
            "URL must start with http:// or https://, got: {}",
            base_url
        )));
    }
    Ok(base_url)
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        response.json().await.map_err(ApiClientError::Request)
    } else {
        Err(api_error(response).await)
    }
}

async fn handle_empty(response: reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(api_error(response).await)
    }
}

async fn api_error(response: reqwest::Response) -> ApiClientError {
    let status = response.status();
    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| error_message(&v))
        .unwrap_or_else(|| status.to_string());

    ApiClientError::ApiError {
        status: status.as_u16(),
        message,
    }
}

fn error_message(body: &serde_json::Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|field| body.get(field).and_then(|v| v.as_str()))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StaticToken;

    fn tokens() -> Arc<dyn TokenProvider> {
        Arc::new(StaticToken::new("t0k3n"))
    }

    #[test]
    fn test_client_creation() {
        let client = HttpLocationApi::new("https://api.example.com/v1/", tokens());
        assert!(client.is_ok());

        let client = client.unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v1");
        assert_eq!(client.url("/session/start"), "https://api.example.com/v1/session/start");
    }

    #[test]
    fn test_invalid_url() {
        let err = HttpLocationApi::new("api.example.com", tokens()).unwrap_err();
        assert!(matches!(err, ApiClientError::InvalidUrl(_)));
        assert!(matches!(Error::from(err), Error::InvalidConfig(_)));
    }

    #[test]
    fn test_api_error_maps_to_engine_error() {
        let err: Error = ApiClientError::ApiError {
            status: 503,
            message: "maintenance".into(),
        }
        .into();
        assert!(matches!(err, Error::Api { status: 503, .. }));
    }

    #[test]
    fn test_error_message_extraction() {
        let body = serde_json::json!({"error": "session expired"});
        assert_eq!(error_message(&body).as_deref(), Some("session expired"));

        let body = serde_json::json!({"message": "invalid interval"});
        assert_eq!(error_message(&body).as_deref(), Some("invalid interval"));

        let body = serde_json::json!({"detail": 42});
        assert_eq!(error_message(&body), None);
    }
}
