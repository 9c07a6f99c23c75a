//! Constants for the download module (timeouts, pacing, progress cadence).

use std::time::Duration;

/// HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout for one fetch attempt (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-worker pause after each successful fetch (1 second).
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 3;

/// Minimum allowed worker count.
pub const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count.
pub const MAX_WORKERS: usize = 64;

/// Emit a progress event after this many completions.
pub const PROGRESS_EVERY_COMPLETIONS: usize = 5;

/// Emit a progress event at least this often while documents complete.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(15);
