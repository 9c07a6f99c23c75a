//! Pluggable storage backends for fetched artifacts.
//!
//! The orchestrator is built against the [`StorageBackend`] capability set;
//! the concrete variant is chosen once at startup by [`connect_storage`] and
//! shared by every worker.

mod blob;
mod local;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::StorageConfig;
use crate::document::{InvalidLocator, StorageLocator};

pub use blob::{BlobConnection, BlobStorage};
pub use local::LocalStorage;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Local filesystem failure.
    #[error("storage IO error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The locator would resolve outside the storage root.
    #[error(transparent)]
    InvalidLocator(#[from] InvalidLocator),

    /// Transport failure talking to the blob service.
    #[error("blob request for '{key}' failed: {source}")]
    BlobRequest {
        /// Blob key (or container name).
        key: String,
        /// Underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    /// The blob service answered with an unexpected status.
    #[error("blob service returned HTTP {status} for '{key}'")]
    BlobStatus {
        /// Blob key (or container name).
        key: String,
        /// HTTP status code.
        status: u16,
    },

    /// The blob connection string is unusable.
    #[error("invalid blob connection string: {0}")]
    InvalidConnection(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn blob_request(key: impl Into<String>, source: reqwest::Error) -> Self {
        Self::BlobRequest {
            key: key.into(),
            source,
        }
    }

    pub(crate) fn blob_status(key: impl Into<String>, status: u16) -> Self {
        Self::BlobStatus {
            key: key.into(),
            status,
        }
    }
}

/// Which storage variant is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Hierarchical local filesystem.
    Local,
    /// Remote blob container.
    Blob,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Blob => f.write_str("blob"),
        }
    }
}

/// Capability set shared by every storage variant.
///
/// Implementations must be safe to call from many workers at once. Two
/// workers never write the same locator concurrently: each document is owned
/// by exactly one worker, and the orchestrator renames documents whose
/// derived locators would collide.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Persists `bytes` at `locator`, replacing any previous content.
    async fn save(&self, locator: &StorageLocator, bytes: &[u8]) -> Result<(), StorageError>;

    /// Returns true when non-empty content is stored at `locator`.
    async fn exists(&self, locator: &StorageLocator) -> Result<bool, StorageError>;

    /// Returns the stored size in bytes, or 0 when nothing is stored.
    async fn size(&self, locator: &StorageLocator) -> Result<u64, StorageError>;

    /// Prepares the hierarchy below `prefix` for writes.
    async fn create_directories(&self, prefix: &str) -> Result<(), StorageError>;

    /// Identifies the variant for logging and summaries.
    fn kind(&self) -> StorageKind;

    /// Human-readable destination (directory or container URL).
    fn describe(&self) -> String;
}

/// Constructs and initialises the configured backend.
///
/// # Errors
///
/// Fails when the local base directory cannot be created, when the blob
/// connection string is malformed, or when the container cannot be reached.
pub async fn connect_storage(
    config: &StorageConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match config {
        StorageConfig::Local { base_dir } => {
            let storage = LocalStorage::create(base_dir.clone()).await?;
            Ok(Arc::new(storage))
        }
        StorageConfig::Blob {
            connection_string,
            container,
        } => {
            let connection = BlobConnection::parse(connection_string)?;
            let storage = BlobStorage::connect(client, connection, container.clone()).await?;
            Ok(Arc::new(storage))
        }
    }
}
