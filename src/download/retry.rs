//! Retry controller with exponential backoff around single fetch attempts.
//!
//! Failure handling is data rather than control flow: every attempt yields
//! an [`AttemptOutcome`], the [`RetryPolicy`] turns a failure into a
//! [`RetryDecision`], and [`run_attempts`] drives the per-document state
//! machine until a terminal outcome is reached.
//!
//! # Example
//!
//! ```
//! use docfetch_core::download::{
//!     DownloadError, FailureCause, RetryDecision, RetryPolicy,
//! };
//!
//! let policy = RetryPolicy::default();
//! let cause = FailureCause::from_error(&DownloadError::http_status("https://example.com/a.pdf", 503));
//!
//! match policy.should_retry(&cause, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::DownloadError;
use crate::document::StorageLocator;
use crate::lifecycle::ShutdownToken;

/// Default number of retries after the first attempt (four attempts total).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Category of a failed attempt, used for retry decisions and failure analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request or body read exceeded the per-request timeout.
    Timeout,
    /// Connection refused, reset, or closed.
    Connection,
    /// Server answered with an error status (other than 429).
    HttpStatus,
    /// Server answered 429 Too Many Requests.
    RateLimited,
    /// Storage backend failed to check or persist the artifact.
    Storage,
    /// The source URL is malformed.
    InvalidUrl,
    /// Any other transport failure.
    Network,
    /// The worker task itself failed.
    Internal,
}

impl FailureKind {
    /// Returns whether another attempt could succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidUrl | Self::Internal)
    }

    /// Short machine-friendly label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::HttpStatus => "http_status",
            Self::RateLimited => "rate_limited",
            Self::Storage => "storage",
            Self::InvalidUrl => "invalid_url",
            Self::Network => "network",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCause {
    /// Failure category.
    pub kind: FailureKind,
    /// HTTP status, for status failures.
    pub http_status: Option<u16>,
    /// Wait requested by the server through Retry-After, in seconds.
    pub retry_after_secs: Option<u64>,
    /// Human-readable detail.
    pub message: String,
}

impl FailureCause {
    /// Builds a cause with no HTTP status.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            http_status: None,
            retry_after_secs: None,
            message: message.into(),
        }
    }

    /// Classifies a download error.
    ///
    /// | Error | Kind |
    /// |-------|------|
    /// | Timeout | Timeout |
    /// | Network (connect/reset) | Connection |
    /// | Network (other) | Network |
    /// | HTTP 429 | RateLimited |
    /// | HTTP other | HttpStatus |
    /// | Storage | Storage |
    /// | InvalidUrl | InvalidUrl |
    #[must_use]
    pub fn from_error(error: &DownloadError) -> Self {
        let kind = match error {
            DownloadError::Timeout { .. } => FailureKind::Timeout,
            DownloadError::Network { .. } if error.is_connection_failure() => {
                FailureKind::Connection
            }
            DownloadError::Network { .. } | DownloadError::Cancelled { .. } => FailureKind::Network,
            DownloadError::HttpStatus { status: 429, .. } => FailureKind::RateLimited,
            DownloadError::HttpStatus { .. } => FailureKind::HttpStatus,
            DownloadError::Storage { .. } => FailureKind::Storage,
            DownloadError::InvalidUrl { .. } => FailureKind::InvalidUrl,
        };
        Self {
            kind,
            http_status: error.http_status_code(),
            retry_after_secs: error.retry_after_secs(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Data describing a successful fetch (or an idempotent skip).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSuccess {
    /// Where the artifact lives.
    pub locator: StorageLocator,
    /// Bytes transferred over the network (0 for a skip).
    pub bytes: u64,
    /// Time spent on the successful attempt.
    pub elapsed: Duration,
    /// True when the artifact already existed and nothing was fetched.
    pub skipped: bool,
}

/// Tagged result of one attempt, or of a whole attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The document is stored.
    Success(FetchSuccess),
    /// The attempt failed; another attempt may succeed.
    TransientFailure(FailureCause),
    /// No further attempts will be made.
    PermanentFailure {
        /// Cause of the last failed attempt.
        cause: FailureCause,
        /// Attempts made, including the first.
        attempts: u32,
    },
    /// Shutdown was requested before the sequence finished.
    Cancelled,
}

impl AttemptOutcome {
    /// Maps a failed attempt's error to an outcome.
    #[must_use]
    pub fn from_error(error: &DownloadError) -> Self {
        if matches!(error, DownloadError::Cancelled { .. }) {
            return Self::Cancelled;
        }
        Self::TransientFailure(FailureCause::from_error(error))
    }
}

/// Terminal outcome of [`run_attempts`] plus the number of attempts made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Never [`AttemptOutcome::TransientFailure`].
    pub outcome: AttemptOutcome,
    /// Attempts started.
    pub attempts: u32,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Bounded retry configuration.
///
/// # Delay Calculation
///
/// ```text
/// delay(n) = base_delay * 2^n + random(0..=jitter)
/// ```
///
/// where `n` is the 0-indexed attempt that just failed. With defaults the
/// delays are exactly 1s, 2s, 4s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: None,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with a retry budget and base delay.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Creates a policy with a custom retry budget, using defaults otherwise.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Adds up to `jitter` of random delay to each backoff.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Caps individual backoff delays. Uncapped by default.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Retries allowed after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts allowed.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Base backoff delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self, cause), fields(kind = %cause.kind, max_attempts = self.max_attempts()))]
    pub fn should_retry(&self, cause: &FailureCause, attempt: u32) -> RetryDecision {
        if !cause.kind.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: format!("{} failure - retry would not help", cause.kind),
            };
        }

        if attempt >= self.max_attempts() {
            debug!(attempt, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts()),
            };
        }

        let delay = self.backoff_delay(attempt.saturating_sub(1));
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Delay after the 0-indexed attempt `n` failed.
    #[must_use]
    pub fn backoff_delay(&self, n: u32) -> Duration {
        let factor = 2u32.checked_pow(n).unwrap_or(u32::MAX);
        let delay = self.base_delay.checked_mul(factor).unwrap_or(Duration::MAX);
        let delay = match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        };
        delay.saturating_add(self.calculate_jitter())
    }

    fn calculate_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=max_ms);
        Duration::from_millis(jitter_ms)
    }
}

/// Drives one document's attempt sequence to a terminal outcome.
///
/// `attempt_fn` receives the 1-indexed attempt number. Shutdown is checked
/// before every attempt and interrupts backoff sleeps.
pub async fn run_attempts<F, Fut>(
    policy: &RetryPolicy,
    shutdown: &ShutdownToken,
    document_id: &str,
    mut attempt_fn: F,
) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    let mut attempt = 0u32;
    loop {
        if shutdown.is_cancelled() {
            debug!(document_id, attempt, "shutdown before attempt");
            return RetryOutcome {
                outcome: AttemptOutcome::Cancelled,
                attempts: attempt,
            };
        }
        attempt += 1;

        let cause = match attempt_fn(attempt).await {
            AttemptOutcome::TransientFailure(cause) => cause,
            terminal => {
                return RetryOutcome {
                    outcome: terminal,
                    attempts: attempt,
                };
            }
        };

        match policy.should_retry(&cause, attempt) {
            RetryDecision::Retry { delay, attempt: next } => {
                info!(
                    document_id,
                    attempt = next,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    error = %cause,
                    "retrying document"
                );
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!(document_id, "backoff interrupted by shutdown");
                        return RetryOutcome {
                            outcome: AttemptOutcome::Cancelled,
                            attempts: attempt,
                        };
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                warn!(document_id, attempts = attempt, error = %cause, reason = %reason, "giving up on document");
                return RetryOutcome {
                    outcome: AttemptOutcome::PermanentFailure {
                        cause,
                        attempts: attempt,
                    },
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn transient(kind: FailureKind) -> AttemptOutcome {
        AttemptOutcome::TransientFailure(FailureCause::new(kind, "boom"))
    }

    fn success() -> AttemptOutcome {
        AttemptOutcome::Success(FetchSuccess {
            locator: StorageLocator::parse("a/b/c.pdf").unwrap(),
            bytes: 3,
            elapsed: Duration::from_millis(5),
            skipped: false,
        })
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_delays_double_without_jitter() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_uncapped_by_default() {
        let policy = RetryPolicy::with_max_retries(10);
        assert_eq!(policy.backoff_delay(9), Duration::from_secs(512));
        assert_eq!(
            policy.backoff_delay(40),
            Duration::from_secs(u64::from(u32::MAX))
        );
    }

    #[test]
    fn test_backoff_delay_respects_cap_and_overflow() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(5));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::default().with_jitter(Duration::from_millis(200));
        for _ in 0..100 {
            let delay = policy.backoff_delay(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_should_retry_until_budget_exhausted() {
        let policy = RetryPolicy::default();
        let cause = FailureCause::new(FailureKind::HttpStatus, "HTTP 500");
        assert_eq!(
            policy.should_retry(&cause, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 2
            }
        );
        assert!(matches!(
            policy.should_retry(&cause, 4),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_invalid_url_is_not_retried() {
        let policy = RetryPolicy::default();
        let cause = FailureCause::new(FailureKind::InvalidUrl, "invalid URL: x");
        assert!(matches!(
            policy.should_retry(&cause, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_classify_http_statuses() {
        let cause = FailureCause::from_error(&DownloadError::http_status("u", 429));
        assert_eq!(cause.kind, FailureKind::RateLimited);
        assert_eq!(cause.http_status, Some(429));

        let cause = FailureCause::from_error(&DownloadError::http_status("u", 404));
        assert_eq!(cause.kind, FailureKind::HttpStatus);
        assert!(cause.kind.is_retryable());
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            FailureCause::from_error(&DownloadError::timeout("u")).kind,
            FailureKind::Timeout
        );
        assert_eq!(
            FailureCause::from_error(&DownloadError::invalid_url("u")).kind,
            FailureKind::InvalidUrl
        );
        assert_eq!(
            AttemptOutcome::from_error(&DownloadError::cancelled("u")),
            AttemptOutcome::Cancelled
        );
    }

    // ==================== Controller Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_run_attempts_exhausts_with_exponential_delays() {
        let policy = RetryPolicy::default();
        let shutdown = ShutdownToken::new();
        let started = tokio::time::Instant::now();
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let result = run_attempts(&policy, &shutdown, "doc", |_| {
            let stamps = Arc::clone(&stamps);
            async move {
                stamps.lock().unwrap().push(started.elapsed());
                transient(FailureKind::HttpStatus)
            }
        })
        .await;

        assert_eq!(result.attempts, 4);
        assert!(matches!(
            result.outcome,
            AttemptOutcome::PermanentFailure { attempts: 4, .. }
        ));
        let stamps = stamps.lock().unwrap();
        let gaps: Vec<u64> = stamps.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![1, 2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_attempts_stops_on_success() {
        let calls = AtomicU32::new(0);
        let result = run_attempts(&RetryPolicy::default(), &ShutdownToken::new(), "doc", |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    transient(FailureKind::Timeout)
                } else {
                    success()
                }
            }
        })
        .await;

        assert_eq!(result.attempts, 3);
        assert!(matches!(result.outcome, AttemptOutcome::Success(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_attempts_invalid_url_is_immediate() {
        let result = run_attempts(&RetryPolicy::default(), &ShutdownToken::new(), "doc", |_| async {
            transient(FailureKind::InvalidUrl)
        })
        .await;
        assert_eq!(result.attempts, 1);
        assert!(matches!(
            result.outcome,
            AttemptOutcome::PermanentFailure { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_run_attempts_honours_pre_cancelled_token() {
        let shutdown = ShutdownToken::new();
        shutdown.cancel();
        let result = run_attempts(&RetryPolicy::default(), &shutdown, "doc", |_| async {
            success()
        })
        .await;
        assert_eq!(result.attempts, 0);
        assert_eq!(result.outcome, AttemptOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_attempts_backoff_interrupted_by_shutdown() {
        let shutdown = ShutdownToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let result = run_attempts(&RetryPolicy::default(), &shutdown, "doc", |_| async {
            transient(FailureKind::Connection)
        })
        .await;
        assert_eq!(result.attempts, 1);
        assert_eq!(result.outcome, AttemptOutcome::Cancelled);
    }
}
