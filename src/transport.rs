//! Delivery transport.
//!
//! The publisher talks to the ingestion API through the [`Transport`] trait so
//! that tests (and embedders) can inject their own. [`HttpTransport`] is the
//! reqwest-backed implementation used in production.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default timeout for ingestion requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised before a response is received.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Header name or value rejected by the HTTP stack
    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    /// Generic transport failure
    #[error("transport failed: {0}")]
    Failed(String),
}

/// A raw response from the ingestion API.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a JSON body to a path on the ingestion API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` to `path`, attaching `headers` verbatim.
    async fn post_json(
        &self,
        path: &str,
        headers: &[(String, String)],
        body: &serde_json::Value,
    ) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport bound to a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    /// HTTP client (reused for connection pooling)
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| TransportError::InvalidHeader(name.clone()))?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        path: &str,
        headers: &[(String, String)],
        body: &serde_json::Value,
    ) -> Result<TransportResponse, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .headers(Self::header_map(headers)?)
            .body(serde_json::to_vec(body).map_err(|e| TransportError::Failed(e.to_string()))?)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}
