//! Failure records, pattern analysis, and the optional JSON Lines failure log.
//!
//! Every document that ends the run without its payload stored contributes
//! one [`FailureRecord`]. [`analyze`] turns the collected records into the
//! breakdown shown in the final summary, including simple remediation hints.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::document::{DocumentRecord, DocumentStatus};
use crate::download::{FailureCause, FailureKind};

/// Share of timeouts above which a slow server is suspected.
const TIMEOUT_SHARE_THRESHOLD: f64 = 0.2;

/// Share of connection failures above which connectivity is suspected.
const CONNECTION_SHARE_THRESHOLD: f64 = 0.3;

/// One permanently failed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Document id.
    pub id: String,
    /// Document title.
    pub title: String,
    /// Source URL.
    pub url: String,
    /// Failure category of the last attempt.
    pub kind: FailureKind,
    /// HTTP status of the last attempt, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Retry-After wait the server requested on the last attempt, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Short grouping label.
    pub reason: String,
    /// Full error text of the last attempt.
    pub error: String,
    /// Attempts made.
    pub attempts: u32,
    /// Terminal status (`URL_ONLY` or `FAILED`).
    pub status: DocumentStatus,
    /// Placeholder locator when one was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl FailureRecord {
    /// Builds a record from the final cause of a document's attempt sequence.
    #[must_use]
    pub fn new(
        record: &DocumentRecord,
        cause: &FailureCause,
        attempts: u32,
        status: DocumentStatus,
        placeholder: Option<String>,
    ) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            url: record.source_url.clone(),
            kind: cause.kind,
            http_status: cause.http_status,
            retry_after_secs: cause.retry_after_secs,
            reason: reason_label(cause),
            error: cause.message.clone(),
            attempts,
            status,
            placeholder,
        }
    }
}

/// Short label used to group similar failures.
#[must_use]
pub fn reason_label(cause: &FailureCause) -> String {
    match (cause.kind, cause.http_status) {
        (FailureKind::RateLimited, _) => "Rate limited (HTTP 429)".to_string(),
        (FailureKind::HttpStatus, Some(status)) => format!("HTTP {status}"),
        (FailureKind::HttpStatus, None) => "HTTP error".to_string(),
        (FailureKind::Timeout, _) => "Request timeout".to_string(),
        (FailureKind::Connection, _) => "Connection failed".to_string(),
        (FailureKind::Storage, _) => "Storage error".to_string(),
        (FailureKind::InvalidUrl, _) => "Invalid URL".to_string(),
        (FailureKind::Network, _) => "Network error".to_string(),
        (FailureKind::Internal, _) => "Internal error".to_string(),
    }
}

/// Aggregated view of a run's failures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureAnalysis {
    /// Failures analysed.
    pub total: usize,
    /// Most frequent reasons, at most five.
    pub top_reasons: Vec<(String, usize)>,
    /// Counts per failure category, most frequent first.
    pub by_kind: Vec<(FailureKind, usize)>,
    /// Most frequent HTTP status codes, at most three.
    pub by_status: Vec<(u16, usize)>,
    /// Operator hints derived from the failure mix.
    pub recommendations: Vec<String>,
}

impl FailureAnalysis {
    /// Percentage of all failures represented by `count`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.total as f64
        }
    }

    /// Renders the analysis as indented summary lines.
    #[must_use]
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Failure analysis ({} documents):", self.total)];
        lines.push("  Top failure reasons:".to_string());
        for (reason, count) in &self.top_reasons {
            lines.push(format!("    - {reason}: {count} ({:.1}%)", self.percent(*count)));
        }
        if self.by_kind.len() > 1 {
            lines.push("  Categories:".to_string());
            for (kind, count) in &self.by_kind {
                lines.push(format!("    - {kind}: {count} ({:.1}%)", self.percent(*count)));
            }
        }
        if !self.by_status.is_empty() {
            lines.push("  HTTP status codes:".to_string());
            for (status, count) in &self.by_status {
                lines.push(format!("    - {status}: {count}"));
            }
        }
        if !self.recommendations.is_empty() {
            lines.push("  Recommendations:".to_string());
            for hint in &self.recommendations {
                lines.push(format!("    - {hint}"));
            }
        }
        lines
    }
}

fn ranked<K: Clone + Ord + std::hash::Hash>(counts: HashMap<K, usize>, limit: usize) -> Vec<(K, usize)> {
    let mut entries: Vec<(K, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(limit);
    entries
}

/// Computes the failure breakdown and recommendations.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn analyze(failures: &[FailureRecord]) -> FailureAnalysis {
    if failures.is_empty() {
        return FailureAnalysis::default();
    }

    let mut reasons: HashMap<String, usize> = HashMap::new();
    let mut kinds: HashMap<FailureKind, usize> = HashMap::new();
    let mut statuses: HashMap<u16, usize> = HashMap::new();
    for failure in failures {
        *reasons.entry(failure.reason.clone()).or_default() += 1;
        *kinds.entry(failure.kind).or_default() += 1;
        if let Some(status) = failure.http_status {
            *statuses.entry(status).or_default() += 1;
        }
    }

    let total = failures.len();
    let count_of = |kind: FailureKind| kinds.get(&kind).copied().unwrap_or(0);
    let mut recommendations = Vec::new();

    if count_of(FailureKind::RateLimited) > 0 {
        recommendations.push("Increase the delay between requests (--delay)".to_string());
        recommendations.push("Reduce the number of concurrent workers (--workers)".to_string());
        let requested_wait = failures
            .iter()
            .filter(|failure| failure.kind == FailureKind::RateLimited)
            .filter_map(|failure| failure.retry_after_secs)
            .max();
        if let Some(secs) = requested_wait {
            recommendations.push(format!(
                "Server asked to wait up to {secs}s (Retry-After); rerun later or raise --retry-base-delay-ms"
            ));
        }
    }
    if count_of(FailureKind::Timeout) as f64 > total as f64 * TIMEOUT_SHARE_THRESHOLD {
        recommendations.push("Server appears slow; consider increasing --timeout".to_string());
        recommendations.push("Try running during off-peak hours".to_string());
    }
    if count_of(FailureKind::Connection) as f64 > total as f64 * CONNECTION_SHARE_THRESHOLD {
        recommendations.push("Check network connectivity".to_string());
        recommendations.push("The source server may be experiencing issues".to_string());
    }
    let not_found = statuses.get(&404).copied().unwrap_or(0);
    if not_found > 0 {
        recommendations.push(format!("{not_found} documents not found; URLs may be outdated"));
        recommendations.push("Consider refreshing the source metadata".to_string());
    }
    if count_of(FailureKind::Storage) > 0 {
        recommendations.push("Check the storage backend's availability and free space".to_string());
    }
    if count_of(FailureKind::InvalidUrl) > 0 {
        recommendations.push("Fix malformed URLs in the input manifest".to_string());
    }

    FailureAnalysis {
        total,
        top_reasons: ranked(reasons, 5),
        by_kind: ranked(kinds, usize::MAX),
        by_status: ranked(statuses, 3),
        recommendations,
    }
}

/// Appends failures to a JSON Lines log, creating it if needed.
///
/// # Errors
///
/// Returns an IO error if the file cannot be opened or written.
pub async fn write_failure_log(path: &Path, failures: &[FailureRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut buffer = Vec::new();
    for failure in failures {
        serde_json::to_writer(&mut buffer, failure)?;
        buffer.push(b'\n');
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&buffer).await?;
    file.flush().await?;
    debug!(path = %path.display(), count = failures.len(), "failure log written");
    Ok(())
}
