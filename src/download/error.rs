//! Error types for the download module.
//!
//! Every failure a single fetch attempt can hit is represented here with
//! enough context (URL, locator, status) to be classified by the retry
//! controller and reported in the final failure analysis.

use std::time::SystemTime;

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while fetching and storing one document.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The provided URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The storage backend rejected a read or write.
    #[error("storage error for {locator}: {source}")]
    Storage {
        /// Locator being read or written.
        locator: String,
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },

    /// The transfer was abandoned because shutdown was requested.
    #[error("download of {url} cancelled by shutdown")]
    Cancelled {
        /// The URL being transferred.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::timeout(url);
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a storage error.
    pub fn storage(locator: impl Into<String>, source: StorageError) -> Self {
        Self::Storage {
            locator: locator.into(),
            source,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Returns the HTTP status code if this is an HTTP status error.
    #[must_use]
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Seconds the server asked us to wait, from a Retry-After header.
    ///
    /// Accepts both delta-seconds and HTTP-date forms; a date in the past
    /// yields zero.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        let Self::HttpStatus {
            retry_after: Some(value),
            ..
        } = self
        else {
            return None;
        };
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(secs);
        }
        let at = httpdate::parse_http_date(value).ok()?;
        Some(
            at.duration_since(SystemTime::now())
                .map_or(0, |wait| wait.as_secs()),
        )
    }

    /// Returns true when the network error looks like a refused or reset connection.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::Network { source, .. } => {
                source.is_connect() || {
                    let text = error_chain_text(source);
                    text.contains("connection refused")
                        || text.contains("connection reset")
                        || text.contains("connection closed")
                }
            }
            _ => false,
        }
    }
}

fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string().to_lowercase();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string().to_lowercase());
        source = inner.source();
    }
    text
}
