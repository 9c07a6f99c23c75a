//! Placeholder artifacts written in place of documents that could not be fetched.

use std::time::SystemTime;

use super::FailureCause;
use crate::document::DocumentRecord;

/// Renders the plain-text placeholder body for `record`.
///
/// The body always contains the original source URL on a line of its own so
/// the record can be retried by hand later.
#[must_use]
pub fn render_placeholder(
    record: &DocumentRecord,
    cause: &FailureCause,
    attempts: u32,
    at: SystemTime,
) -> String {
    let title = if record.title.trim().is_empty() {
        "Unknown"
    } else {
        record.title.as_str()
    };
    let year = record.year.as_deref().unwrap_or("Unknown");

    let http_status = cause
        .http_status
        .map(|status| format!("- HTTP status: {status}\n"))
        .unwrap_or_default();

    format!(
        "Document Download Failed - URL Record
=====================================

Document Information:
- Title: {title}
- ID: {id}
- Type: {major_type}
- Country: {country}
- Language: {language}
- Year: {year}

Original URL:
{url}

Download Failure Details:
- Attempts: {attempts}
- Failure category: {kind}
{http_status}- Last error: {message}
- Timestamp: {timestamp}

The document could not be downloaded; its metadata and source URL are kept here.
",
        id = record.id,
        major_type = record.major_type_label(),
        country = record.country_label(),
        language = record.language_label(),
        url = record.source_url,
        kind = cause.kind,
        message = cause.message,
        timestamp = httpdate::fmt_http_date(at),
    )
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::download::FailureKind;

    #[test]
    fn test_placeholder_contains_url_and_failure_detail() {
        let record = DocumentRecord::new("42", "https://example.org/missing.pdf")
            .with_title("Lost Report")
            .with_classification("Nepal", "Report", "2012");
        let cause = FailureCause {
            kind: FailureKind::HttpStatus,
            http_status: Some(500),
            retry_after_secs: None,
            message: "HTTP 500 downloading https://example.org/missing.pdf".to_string(),
        };
        let at = UNIX_EPOCH + Duration::from_secs(784_111_777);

        let body = render_placeholder(&record, &cause, 4, at);

        assert!(body.lines().any(|l| l == "https://example.org/missing.pdf"));
        assert!(body.contains("- Attempts: 4"));
        assert!(body.contains("- HTTP status: 500"));
        assert!(body.contains("- Country: Nepal"));
        assert!(body.contains("- Language: Unknown"));
        assert!(body.contains("Sun, 06 Nov 1994 08:49:37 GMT"));
    }

    #[test]
    fn test_placeholder_without_status_keeps_layout() {
        let record = DocumentRecord::new("7", "https://example.org/slow.pdf");
        let cause = FailureCause::new(FailureKind::Timeout, "request timed out");

        let body = render_placeholder(&record, &cause, 2, UNIX_EPOCH);

        assert!(!body.contains("HTTP status"));
        assert!(body.contains("- Failure category: timeout\n- Last error: request timed out\n"));
        assert!(body.contains("- Title: Unknown"));
        assert!(body.starts_with("Document Download Failed - URL Record\n"));
        assert!(body.ends_with("source URL are kept here.\n"));
    }
}
