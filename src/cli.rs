//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use docfetch_core::config::{ConfigError, MAX_RETRIES_LIMIT, RunConfig, StorageConfig, duration_from_secs};
use docfetch_core::download::constants::{DEFAULT_WORKERS, MAX_WORKERS};
use docfetch_core::DEFAULT_MAX_RETRIES;

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageArg {
    /// Hierarchical directories under --output
    Local,
    /// Remote blob container addressed by --connection-string
    Blob,
}

/// Fetch every document in a manifest into local or blob storage.
///
/// Documents are stored as country/type/year/filename. Documents that cannot
/// be fetched after all retries are preserved as URL-only placeholders.
#[derive(Parser, Debug)]
#[command(name = "docfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Document manifest (JSON array or JSON Lines)
    pub input: PathBuf,

    /// Base directory for local storage
    #[arg(short, long, default_value = "pdfs")]
    pub output: PathBuf,

    /// Storage backend
    #[arg(long, value_enum, default_value_t = StorageArg::Local)]
    pub storage: StorageArg,

    /// Blob connection string (BlobEndpoint=...;SharedAccessSignature=...)
    #[arg(long, env = "DOCFETCH_BLOB_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Blob container name
    #[arg(long, default_value = "pdfs")]
    pub container: String,

    /// Concurrent workers (1-64)
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS as u8, value_parser = clap::value_parser!(u8).range(1..=MAX_WORKERS as i64))]
    pub workers: u8,

    /// Process at most this many documents
    #[arg(long)]
    pub max_downloads: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: u64,

    /// Pause in seconds after each successful fetch, per worker
    #[arg(long, default_value_t = 1.0)]
    pub delay: f64,

    /// Retries after the first attempt (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES, value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_RETRIES_LIMIT)))]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds (doubles on each retry)
    #[arg(long, default_value_t = 1000)]
    pub retry_base_delay_ms: u64,

    /// Maximum random jitter added to each backoff, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub retry_jitter_ms: u64,

    /// Heartbeat interval in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub heartbeat_secs: u64,

    /// SQLite database that receives per-document status updates
    #[arg(long)]
    pub status_db: Option<PathBuf>,

    /// Insert PENDING rows for the manifest's documents before the run
    #[arg(long, requires = "status_db")]
    pub register_documents: bool,

    /// SQL seed script whose INSERT statements are rewritten with final statuses
    #[arg(long)]
    pub status_script: Option<PathBuf>,

    /// Leave the SQL seed script untouched
    #[arg(long)]
    pub no_script_updates: bool,

    /// Append one JSON line per failed document to this file
    #[arg(long)]
    pub failure_log: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Converts the arguments into a run configuration (not yet validated).
    pub fn to_run_config(&self) -> Result<RunConfig, ConfigError> {
        let storage = match self.storage {
            StorageArg::Local => StorageConfig::Local {
                base_dir: self.output.clone(),
            },
            StorageArg::Blob => StorageConfig::Blob {
                connection_string: self.connection_string.clone().unwrap_or_default(),
                container: self.container.clone(),
            },
        };

        Ok(RunConfig {
            storage,
            workers: usize::from(self.workers),
            max_downloads: self.max_downloads,
            request_timeout: Duration::from_secs(self.timeout),
            request_delay: duration_from_secs("delay", self.delay)?,
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_jitter: Duration::from_millis(self.retry_jitter_ms),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            status_db: self.status_db.clone(),
            register_documents: self.register_documents,
            status_script: self.status_script.clone(),
            script_updates: !self.no_script_updates,
            failure_log: self.failure_log.clone(),
        })
    }
}
