//! Document acquisition: HTTP fetching, retries, and the worker pool.
//!
//! # Features
//!
//! - Streamed fetches with a per-request timeout and cooperative cancellation
//! - Structured error types with full context
//! - Bounded retries with exponential backoff, modelled as data
//! - Placeholder artifacts for documents whose retries are exhausted
//! - A semaphore-bounded worker pool consuming completions as they arrive
//!
//! # Example
//!
//! ```no_run
//! use docfetch_core::download::HttpClient;
//! use docfetch_core::lifecycle::ShutdownToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::with_defaults()?;
//! let payload = client
//!     .fetch("https://example.com/report.pdf", &ShutdownToken::new())
//!     .await?;
//! println!("fetched {} bytes", payload.bytes.len());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod engine;
mod error;
mod fetch;
mod placeholder;
mod retry;
mod stats;

pub use client::{FetchedPayload, HttpClient};
pub use engine::{DocumentOutcome, DownloadEngine, EngineError};
pub use error::DownloadError;
pub use fetch::Fetcher;
pub use placeholder::render_placeholder;
pub use retry::{
    AttemptOutcome, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, FailureCause, FailureKind,
    FetchSuccess, RetryDecision, RetryOutcome, RetryPolicy, run_attempts,
};
pub use stats::{RunStatistics, StatsSnapshot};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
