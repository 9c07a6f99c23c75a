//! HTTP client wrapper for fetching document payloads.
//!
//! Bodies are streamed chunk by chunk into memory so that a shutdown request
//! is noticed between chunks instead of only when the whole transfer ends.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, ClientBuilder};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT};
use super::error::DownloadError;
use crate::lifecycle::ShutdownToken;
use crate::user_agent;

/// Payload returned by one successful fetch.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    /// Response body.
    pub bytes: Vec<u8>,
    /// Declared `Content-Type`, if any.
    pub content_type: Option<String>,
    /// Declared `Content-Length`, if any.
    pub content_length: Option<u64>,
}

/// HTTP client for fetching documents.
///
/// Created once per run and shared by every worker so connections are pooled.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client whose requests time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    pub fn with_timeout(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = base_client_builder(request_timeout).build()?;
        Ok(Self { client })
    }

    /// Creates a client with the default 30 second request timeout.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    pub fn with_defaults() -> Result<Self, reqwest::Error> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Returns the underlying reqwest client for sharing with other components.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Fetches `url` into memory.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is not an absolute http(s) URL
    /// - The request fails or times out
    /// - The server answers with a non-success status
    /// - `shutdown` fires while the body is being streamed
    #[instrument(skip(self, shutdown), fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &str,
        shutdown: &ShutdownToken,
    ) -> Result<FetchedPayload, DownloadError> {
        let parsed = Url::parse(url.trim()).map_err(|_| DownloadError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(url));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let capacity = content_length
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0)
            .min(64 * 1024 * 1024);
        let mut bytes = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;
            bytes.extend_from_slice(&chunk);
            if shutdown.is_cancelled() {
                debug!(received = bytes.len(), "transfer abandoned on shutdown");
                return Err(DownloadError::cancelled(url));
            }
        }

        debug!(bytes = bytes.len(), "fetch complete");
        Ok(FetchedPayload {
            bytes,
            content_type,
            content_length,
        })
    }
}

fn base_client_builder(request_timeout: Duration) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(request_timeout))
        .timeout(request_timeout)
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let client = HttpClient::with_defaults().unwrap();
        let shutdown = ShutdownToken::new();

        let err = client.fetch("not a url", &shutdown).await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));

        let err = client
            .fetch("ftp://example.com/a.pdf", &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
    }
}
