//! Blob container storage over the Azure Blob REST protocol.
//!
//! Only shared-access-signature connection strings are supported:
//!
//! ```text
//! BlobEndpoint=https://account.blob.core.windows.net;SharedAccessSignature=sv=...&sig=...
//! ```
//!
//! Account-key strings (`AccountKey=...`) are rejected rather than sent
//! unsigned.
//!
//! The hierarchy is simulated through key prefixes, so directory creation is
//! a no-op.

use std::time::SystemTime;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

use super::{StorageBackend, StorageError, StorageKind};
use crate::document::StorageLocator;

const API_VERSION: &str = "2021-08-06";

/// Parsed blob service connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct BlobConnection {
    endpoint: Url,
    sas: Option<String>,
}

impl std::fmt::Debug for BlobConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobConnection")
            .field("endpoint", &self.endpoint.as_str())
            .field("sas", &self.sas.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl BlobConnection {
    /// Parses a `key=value;key=value` connection string.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConnection`] when `BlobEndpoint` is
    /// missing or not an absolute http(s) URL, or when the string carries an
    /// `AccountKey` without a `SharedAccessSignature`.
    pub fn parse(connection_string: &str) -> Result<Self, StorageError> {
        let mut endpoint = None;
        let mut sas = None;
        let mut account_key = false;

        for part in connection_string.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "BlobEndpoint" => endpoint = Some(value.trim().to_string()),
                "AccountKey" => account_key = !value.trim().is_empty(),
                "SharedAccessSignature" => {
                    let value = value.trim().trim_start_matches('?');
                    if !value.is_empty() {
                        sas = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }

        if account_key && sas.is_none() {
            return Err(StorageError::InvalidConnection(
                "AccountKey connection strings are not supported; use a SharedAccessSignature"
                    .to_string(),
            ));
        }

        let endpoint = endpoint.ok_or_else(|| {
            StorageError::InvalidConnection("missing BlobEndpoint".to_string())
        })?;
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| StorageError::InvalidConnection(format!("BlobEndpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.cannot_be_a_base() {
            return Err(StorageError::InvalidConnection(format!(
                "BlobEndpoint must be an http(s) URL, got '{endpoint}'"
            )));
        }

        Ok(Self { endpoint, sas })
    }

    /// Service endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Stores artifacts as block blobs inside one container.
#[derive(Debug, Clone)]
pub struct BlobStorage {
    client: reqwest::Client,
    connection: BlobConnection,
    container: String,
}

impl BlobStorage {
    /// Connects to the service and creates the container if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is unreachable or rejects container
    /// creation with anything other than "already exists".
    pub async fn connect(
        client: reqwest::Client,
        connection: BlobConnection,
        container: String,
    ) -> Result<Self, StorageError> {
        let storage = Self {
            client,
            connection,
            container,
        };
        storage.ensure_container().await?;
        Ok(storage)
    }

    /// Name of the target container.
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    async fn ensure_container(&self) -> Result<(), StorageError> {
        let url = self.url_for(&[], Some("restype=container"));
        let response = self
            .client
            .put(url)
            .header("x-ms-version", API_VERSION)
            .body(Vec::new())
            .send()
            .await
            .map_err(|e| StorageError::blob_request(&self.container, e))?;

        match response.status() {
            StatusCode::CREATED => {
                info!(container = %self.container, "blob container created");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(container = %self.container, "blob container already exists");
                Ok(())
            }
            status => Err(StorageError::blob_status(&self.container, status.as_u16())),
        }
    }

    fn url_for(&self, key_segments: &[&str], extra_query: Option<&str>) -> Url {
        let mut url = self.connection.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.push(&self.container);
            segments.extend(key_segments);
        }
        let query = match (extra_query, self.connection.sas.as_deref()) {
            (Some(extra), Some(sas)) => Some(format!("{extra}&{sas}")),
            (Some(extra), None) => Some(extra.to_string()),
            (None, Some(sas)) => Some(sas.to_string()),
            (None, None) => None,
        };
        url.set_query(query.as_deref());
        url
    }

    fn blob_url(&self, locator: &StorageLocator) -> Url {
        let segments: Vec<&str> = locator.as_str().split('/').collect();
        self.url_for(&segments, None)
    }
}

fn content_type_for(locator: &StorageLocator) -> &'static str {
    let name = locator.file_name().to_ascii_lowercase();
    if name.ends_with(".pdf") {
        "application/pdf"
    } else if name.ends_with(".txt") {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

#[async_trait]
impl StorageBackend for BlobStorage {
    async fn save(&self, locator: &StorageLocator, bytes: &[u8]) -> Result<(), StorageError> {
        let response = self
            .client
            .put(self.blob_url(locator))
            .header("x-ms-version", API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, content_type_for(locator))
            .header(
                "x-ms-meta-original_filename",
                urlencoding::encode(locator.file_name()).into_owned(),
            )
            .header(
                "x-ms-meta-upload_timestamp",
                httpdate::fmt_http_date(SystemTime::now()),
            )
            .header("x-ms-meta-content_size", bytes.len().to_string())
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| StorageError::blob_request(locator.as_str(), e))?;

        let status = response.status();
        if status.is_success() {
            debug!(key = %locator, bytes = bytes.len(), "blob uploaded");
            Ok(())
        } else {
            Err(StorageError::blob_status(locator.as_str(), status.as_u16()))
        }
    }

    async fn exists(&self, locator: &StorageLocator) -> Result<bool, StorageError> {
        Ok(self.size(locator).await? > 0)
    }

    async fn size(&self, locator: &StorageLocator) -> Result<u64, StorageError> {
        let response = self
            .client
            .head(self.blob_url(locator))
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|e| StorageError::blob_request(locator.as_str(), e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(0),
            status if status.is_success() => Ok(response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)),
            status => Err(StorageError::blob_status(locator.as_str(), status.as_u16())),
        }
    }

    async fn create_directories(&self, _prefix: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Blob
    }

    fn describe(&self) -> String {
        format!(
            "{}/{}",
            self.connection.endpoint.as_str().trim_end_matches('/'),
            self.container
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_string_with_sas() {
        let conn = BlobConnection::parse(
            "BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1;SharedAccessSignature=?sv=1&sig=abc",
        )
        .unwrap();
        assert_eq!(conn.endpoint().as_str(), "http://127.0.0.1:10000/devstoreaccount1");
        assert_eq!(conn.sas.as_deref(), Some("sv=1&sig=abc"));
    }

    #[test]
    fn test_parse_connection_string_requires_endpoint() {
        let err = BlobConnection::parse("AccountName=x;SharedAccessSignature=sig=y").unwrap_err();
        assert!(matches!(err, StorageError::InvalidConnection(_)));

        let err = BlobConnection::parse("BlobEndpoint=ftp://host/x").unwrap_err();
        assert!(matches!(err, StorageError::InvalidConnection(_)));
    }

    #[test]
    fn test_parse_rejects_account_key_without_sas() {
        let err = BlobConnection::parse(
            "DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;\
             AccountKey=Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq==;\
             BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1;",
        )
        .unwrap_err();
        match err {
            StorageError::InvalidConnection(message) => assert!(message.contains("AccountKey")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_prefers_sas_over_account_key() {
        let conn = BlobConnection::parse(
            "BlobEndpoint=http://127.0.0.1:10000/acct;AccountKey=k;SharedAccessSignature=sig=abc",
        )
        .unwrap();
        assert_eq!(conn.sas.as_deref(), Some("sig=abc"));
    }

    #[test]
    fn test_debug_redacts_signature() {
        let conn =
            BlobConnection::parse("BlobEndpoint=https://a.example;SharedAccessSignature=sig=secret")
                .unwrap();
        assert!(!format!("{conn:?}").contains("secret"));
    }

    #[test]
    fn test_blob_url_encodes_key_segments() {
        let conn = BlobConnection::parse(
            "BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1/;SharedAccessSignature=sig=1",
        )
        .unwrap();
        let storage = BlobStorage {
            client: reqwest::Client::new(),
            connection: conn,
            container: "pdfs".to_string(),
        };
        let locator = StorageLocator::parse("Côte/Report/2020/a b.pdf").unwrap();
        assert_eq!(
            storage.blob_url(&locator).as_str(),
            "http://127.0.0.1:10000/devstoreaccount1/pdfs/C%C3%B4te/Report/2020/a%20b.pdf?sig=1"
        );
    }

    #[test]
    fn test_content_type_follows_extension() {
        let pdf = StorageLocator::parse("a/b.PDF").unwrap();
        let txt = StorageLocator::parse("a/b_URL_ONLY.txt").unwrap();
        assert_eq!(content_type_for(&pdf), "application/pdf");
        assert!(content_type_for(&txt).starts_with("text/plain"));
    }
}
