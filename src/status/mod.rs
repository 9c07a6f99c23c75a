//! Status reporting: aggregate counters plus best-effort status sinks.
//!
//! Every terminal document outcome flows through [`StatusReporter`], which
//! updates [`RunStatistics`] under its lock and then notifies the configured
//! [`StatusSink`]. Sink failures are logged and never abort the run.

mod database;
mod script;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::document::{DocumentRecord, DocumentStatus, StorageLocator};
use crate::download::{FailureCause, FetchSuccess, RunStatistics};
use crate::failure::FailureRecord;

pub use database::{Database, DatabaseStatusSink, DbError};
pub use script::{ScriptStatusSink, rewrite_script};

/// Errors raised by status sinks.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The relational store rejected the update.
    #[error("status database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No row exists for the document.
    #[error("document {0} not found in status store")]
    UnknownDocument(String),

    /// The companion script could not be read or written.
    #[error("status script IO error at {path}: {source}")]
    Io {
        /// Script path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Several sinks failed.
    #[error("{} status sinks failed: {}", .0.len(), .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<StatusError>),
}

/// External system of record for final per-document status.
#[async_trait]
pub trait StatusSink: Send + Sync + fmt::Debug {
    /// Records `status` (and optionally where the artifact lives) for a document.
    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        locator: Option<&StorageLocator>,
    ) -> Result<(), StatusError>;

    /// Flushes buffered updates at the end of a run.
    async fn finish(&self) -> Result<(), StatusError> {
        Ok(())
    }
}

/// Sink used when status updates are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatusSink;

#[async_trait]
impl StatusSink for NoopStatusSink {
    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        _locator: Option<&StorageLocator>,
    ) -> Result<(), StatusError> {
        debug!(document_id, %status, "status updates disabled");
        Ok(())
    }
}

/// Fans updates out to several sinks; every sink is tried even if one fails.
#[derive(Debug, Default)]
pub struct CompositeStatusSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl CompositeStatusSink {
    /// Creates an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    pub fn push(&mut self, sink: Arc<dyn StatusSink>) {
        self.sinks.push(sink);
    }

    /// Number of wrapped sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true when no sinks are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

fn combine(errors: Vec<StatusError>) -> Result<(), StatusError> {
    let mut errors = errors;
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(StatusError::Multiple(errors)),
    }
}

#[async_trait]
impl StatusSink for CompositeStatusSink {
    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        locator: Option<&StorageLocator>,
    ) -> Result<(), StatusError> {
        let mut errors = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.update_status(document_id, status, locator).await {
                errors.push(e);
            }
        }
        combine(errors)
    }

    async fn finish(&self) -> Result<(), StatusError> {
        let mut errors = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.finish().await {
                errors.push(e);
            }
        }
        combine(errors)
    }
}

/// Records terminal outcomes in the run statistics and the status sink.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    stats: Arc<RunStatistics>,
    sink: Arc<dyn StatusSink>,
}

impl StatusReporter {
    /// Creates a reporter over shared statistics and a sink.
    #[must_use]
    pub fn new(stats: Arc<RunStatistics>, sink: Arc<dyn StatusSink>) -> Self {
        Self { stats, sink }
    }

    /// Shared statistics updated by this reporter.
    #[must_use]
    pub fn stats(&self) -> &Arc<RunStatistics> {
        &self.stats
    }

    /// Records a stored or skipped document as `DOWNLOADED`.
    ///
    /// Returns whether the sink accepted the update.
    pub async fn report_success(
        &self,
        record: &DocumentRecord,
        success: &FetchSuccess,
        attempts: u32,
    ) -> bool {
        self.stats.record_success(success, attempts);
        self.deliver(&record.id, DocumentStatus::Downloaded, Some(&success.locator))
            .await
    }

    /// Records a document whose attempts were exhausted.
    ///
    /// The status is `URL_ONLY` when a placeholder was written and `FAILED`
    /// otherwise. Returns whether the sink accepted the update.
    pub async fn report_failure(
        &self,
        record: &DocumentRecord,
        cause: &FailureCause,
        attempts: u32,
        placeholder: Option<&StorageLocator>,
    ) -> bool {
        let status = if placeholder.is_some() {
            DocumentStatus::UrlOnly
        } else {
            DocumentStatus::Failed
        };
        let failure = FailureRecord::new(
            record,
            cause,
            attempts,
            status,
            placeholder.map(ToString::to_string),
        );
        self.stats.record_failure(failure, placeholder.is_some());
        self.deliver(&record.id, status, placeholder).await
    }

    /// Records a document abandoned because of shutdown; it stays `PENDING`.
    pub fn report_cancelled(&self, record: &DocumentRecord, attempts: u32) {
        debug!(id = %record.id, attempts, "document left pending after shutdown");
        self.stats.record_cancelled(attempts);
    }

    /// Flushes the sink at the end of the run. Returns whether it succeeded.
    pub async fn finish(&self) -> bool {
        match self.sink.finish().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "status sink flush failed");
                false
            }
        }
    }

    async fn deliver(
        &self,
        document_id: &str,
        status: DocumentStatus,
        locator: Option<&StorageLocator>,
    ) -> bool {
        match self.sink.update_status(document_id, status, locator).await {
            Ok(()) => true,
            Err(e) => {
                warn!(document_id, %status, error = %e, "status update failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::download::FailureKind;

    #[derive(Debug, Default)]
    struct RecordingSink {
        updates: Mutex<Vec<(String, DocumentStatus, Option<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn update_status(
            &self,
            document_id: &str,
            status: DocumentStatus,
            locator: Option<&StorageLocator>,
        ) -> Result<(), StatusError> {
            self.updates.lock().unwrap().push((
                document_id.to_string(),
                status,
                locator.map(ToString::to_string),
            ));
            if self.fail {
                Err(StatusError::UnknownDocument(document_id.to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn success() -> FetchSuccess {
        FetchSuccess {
            locator: StorageLocator::parse("a/b/c/x.pdf").unwrap(),
            bytes: 5,
            elapsed: Duration::ZERO,
            skipped: false,
        }
    }

    #[tokio::test]
    async fn test_reporter_updates_stats_and_sink() {
        let sink = Arc::new(RecordingSink::default());
        let stats = Arc::new(RunStatistics::new(2));
        let reporter = StatusReporter::new(Arc::clone(&stats), sink.clone());
        let record = DocumentRecord::new("1", "https://h/x.pdf");

        assert!(reporter.report_success(&record, &success(), 1).await);
        let cause = FailureCause::new(FailureKind::HttpStatus, "HTTP 500");
        let placeholder = StorageLocator::parse("a/b/c/1__URL_ONLY.txt").unwrap();
        assert!(
            reporter
                .report_failure(&record, &cause, 4, Some(&placeholder))
                .await
        );

        let updates = sink.updates.lock().unwrap();
        assert_eq!(updates[0].1, DocumentStatus::Downloaded);
        assert_eq!(updates[0].2.as_deref(), Some("a/b/c/x.pdf"));
        assert_eq!(updates[1].1, DocumentStatus::UrlOnly);
        let snap = stats.snapshot();
        assert_eq!((snap.downloaded, snap.failed, snap.url_only), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_sink_failure_is_not_fatal() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let stats = Arc::new(RunStatistics::new(1));
        let reporter = StatusReporter::new(Arc::clone(&stats), sink);
        let record = DocumentRecord::new("1", "https://h/x.pdf");
        let cause = FailureCause::new(FailureKind::Timeout, "t");

        assert!(!reporter.report_failure(&record, &cause, 4, None).await);
        let snap = stats.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.url_only, 0);
        assert_eq!(stats.failures()[0].status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn test_composite_tries_every_sink() {
        let failing = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let healthy = Arc::new(RecordingSink::default());
        let mut composite = CompositeStatusSink::new();
        composite.push(failing.clone());
        composite.push(healthy.clone());

        let result = composite
            .update_status("9", DocumentStatus::Downloaded, None)
            .await;
        assert!(matches!(result, Err(StatusError::UnknownDocument(_))));
        assert_eq!(healthy.updates.lock().unwrap().len(), 1);
        assert!(composite.finish().await.is_ok());
    }
}
