//! Raw HTTP exchange.
//!
//! [`Transport`] is the seam between the retry logic in [`crate::api`] and
//! the network. Production uses [`ReqwestTransport`]; tests inject
//! `MockTransport` to script status codes and failures.

use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Per-call timeout applied by [`ReqwestTransport`].
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully prepared request: absolute URL, all headers, optional JSON body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

#[cfg(test)]
impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Whatever the server answered, regardless of status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// The request never produced a response (connect error, timeout, broken
/// body stream).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one HTTP exchange. Non-2xx statuses are responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the client with [`REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(format!("HTTP request failed: {e}")))?;
        let status = response.status().as_u16();

        log::debug!(
            "HTTP {:?} {} duration_ms={} status={}",
            request.method,
            request.url,
            start.elapsed().as_millis(),
            status
        );

        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("Failed to read response body: {e}")))?;
        Ok(HttpResponse { status, body })
    }
}
