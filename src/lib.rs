//! Docfetch Core Library
//!
//! This library provides concurrent bulk document acquisition: given a list
//! of document records, it fetches every source file, stores it in a
//! pluggable backend, and records a durable status for each record while
//! tolerating network faults and mid-run interruption.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`document`] - Document records, filenames, and storage locators
//! - [`storage`] - Storage backend capability and its local/blob variants
//! - [`download`] - HTTP client, retry controller, fetch unit, worker pool
//! - [`status`] - Status reporter and status sinks (database, SQL script)
//! - [`lifecycle`] - Shutdown token, heartbeat, and signal escalation
//! - [`failure`] - Failure records and pattern analysis
//! - [`report`] - Final run report and exit convention
//! - [`config`] - Validated run configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod document;
pub mod download;
pub mod failure;
pub mod lifecycle;
pub mod report;
pub mod status;
pub mod storage;
mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, RunConfig, StorageConfig};
pub use document::{DocumentRecord, DocumentStatus, StorageLocator, load_documents};
pub use download::{
    AttemptOutcome, DEFAULT_MAX_RETRIES, DownloadEngine, DownloadError, EngineError, FailureKind,
    Fetcher, HttpClient, RetryPolicy, RunStatistics,
};
pub use lifecycle::ShutdownToken;
pub use report::{ExitOutcome, RunReport};
pub use status::{StatusReporter, StatusSink};
pub use storage::{StorageBackend, StorageError, connect_storage};
