//! Validated run configuration.
//!
//! The binary converts its command-line arguments into a [`RunConfig`] and
//! calls [`RunConfig::validate`] before anything touches the network or disk.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::download::constants::{
    DEFAULT_REQUEST_DELAY, DEFAULT_REQUEST_TIMEOUT, DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS,
};
use crate::download::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, RetryPolicy};
use crate::lifecycle::DEFAULT_HEARTBEAT_INTERVAL;

/// Highest accepted retry budget.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Configuration problems detected before a run starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Worker count outside the supported range.
    #[error("invalid worker count {0}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers(usize),

    /// Retry budget above the supported maximum.
    #[error("invalid max retries {0}: must be at most {MAX_RETRIES_LIMIT}")]
    InvalidMaxRetries(u32),

    /// The blob backend was selected without a connection string.
    #[error("blob storage requires a connection string (--connection-string or DOCFETCH_BLOB_CONNECTION_STRING)")]
    MissingConnectionString,

    /// The connection string does not name an endpoint.
    #[error("connection string has no BlobEndpoint")]
    MissingBlobEndpoint,

    /// The blob container name is empty.
    #[error("blob container name must not be empty")]
    EmptyContainer,

    /// A delay or timeout value is negative, NaN, or infinite.
    #[error("invalid {name}: {value} (must be a finite, non-negative number of seconds)")]
    InvalidDuration {
        /// Option name.
        name: &'static str,
        /// Rejected value, as given.
        value: String,
    },

    /// The request timeout is zero.
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,
}

/// Where artifacts are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Hierarchical directories under a base directory.
    Local {
        /// Root directory.
        base_dir: PathBuf,
    },
    /// A remote blob container.
    Blob {
        /// `BlobEndpoint=...;SharedAccessSignature=...`
        connection_string: String,
        /// Container name.
        container: String,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            base_dir: PathBuf::from("pdfs"),
        }
    }
}

/// Everything a run needs besides the documents themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Storage backend selection.
    pub storage: StorageConfig,
    /// Concurrent workers.
    pub workers: usize,
    /// Optional cap on documents considered.
    pub max_downloads: Option<usize>,
    /// Whole-request timeout per attempt.
    pub request_timeout: Duration,
    /// Per-worker pause after each successful fetch.
    pub request_delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base of the exponential backoff.
    pub retry_base_delay: Duration,
    /// Upper bound of random jitter added to each backoff.
    pub retry_jitter: Duration,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
    /// SQLite status database, if any.
    pub status_db: Option<PathBuf>,
    /// Seed `PENDING` rows for the input documents before the run.
    pub register_documents: bool,
    /// Companion SQL script to rewrite, if any.
    pub status_script: Option<PathBuf>,
    /// Whether the companion script is rewritten at all.
    pub script_updates: bool,
    /// JSON Lines failure log, if any.
    pub failure_log: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            workers: DEFAULT_WORKERS,
            max_downloads: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            request_delay: DEFAULT_REQUEST_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_BASE_DELAY,
            retry_jitter: Duration::ZERO,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            status_db: None,
            register_documents: false,
            status_script: None,
            script_updates: true,
            failure_log: None,
        }
    }
}

impl RunConfig {
    /// Checks the configuration for values a run cannot start with.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::InvalidMaxRetries(self.max_retries));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if let StorageConfig::Blob {
            connection_string,
            container,
        } = &self.storage
        {
            if connection_string.trim().is_empty() {
                return Err(ConfigError::MissingConnectionString);
            }
            if !connection_string
                .split(';')
                .any(|part| part.trim().starts_with("BlobEndpoint="))
            {
                return Err(ConfigError::MissingBlobEndpoint);
            }
            if container.trim().is_empty() {
                return Err(ConfigError::EmptyContainer);
            }
        }
        Ok(())
    }

    /// Retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay).with_jitter(self.retry_jitter)
    }

    /// Whether the companion script sink is active.
    #[must_use]
    pub fn script_sink_enabled(&self) -> bool {
        self.script_updates && self.status_script.is_some()
    }
}

/// Converts a user-supplied number of seconds into a [`Duration`].
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDuration`] for negative or non-finite values.
pub fn duration_from_secs(name: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidDuration {
        name,
        value: secs.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn blob(connection_string: &str, container: &str) -> RunConfig {
        RunConfig {
            storage: StorageConfig::Blob {
                connection_string: connection_string.to_string(),
                container: container.to_string(),
            },
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.request_delay, Duration::from_secs(1));
        assert_eq!(config.retry_policy().max_retries(), 3);
        assert!(!config.script_sink_enabled());
    }

    #[test]
    fn test_worker_and_retry_bounds() {
        let config = RunConfig {
            workers: 0,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidWorkers(0)));

        let config = RunConfig {
            max_retries: 11,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxRetries(11)));
    }

    #[test]
    fn test_blob_requires_connection_string_with_endpoint() {
        assert_eq!(
            blob("", "pdfs").validate(),
            Err(ConfigError::MissingConnectionString)
        );
        assert_eq!(
            blob("SharedAccessSignature=sv=1", "pdfs").validate(),
            Err(ConfigError::MissingBlobEndpoint)
        );
        assert_eq!(
            blob("BlobEndpoint=https://acct.blob.example;SharedAccessSignature=sv=1", " ").validate(),
            Err(ConfigError::EmptyContainer)
        );
        assert!(
            blob("BlobEndpoint=https://acct.blob.example;SharedAccessSignature=sv=1", "pdfs")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_duration_from_secs_rejects_bad_values() {
        assert_eq!(
            duration_from_secs("delay", 1.5).unwrap(),
            Duration::from_millis(1500)
        );
        assert!(duration_from_secs("delay", -1.0).is_err());
        assert!(duration_from_secs("delay", f64::NAN).is_err());
        assert!(duration_from_secs("delay", f64::INFINITY).is_err());
    }

    #[test]
    fn test_script_sink_toggle() {
        let config = RunConfig {
            status_script: Some(PathBuf::from("seed.sql")),
            script_updates: false,
            ..RunConfig::default()
        };
        assert!(!config.script_sink_enabled());
    }
}
