use std::sync::Arc;

use tokio::task::JoinError;
use tracing::warn;

use super::super::fetch::Fetcher;
use super::super::retry::{AttemptOutcome, FailureCause, FailureKind, RetryPolicy, run_attempts};
use super::super::stats::RunStatistics;
use crate::document::DocumentRecord;
use crate::lifecycle::ShutdownToken;
use crate::status::StatusReporter;

/// How one document's task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Fetched and stored during this run.
    Downloaded,
    /// Already present in storage.
    Skipped,
    /// Attempts exhausted; placeholder written.
    UrlOnly,
    /// Attempts exhausted; placeholder could not be written.
    Failed,
    /// Abandoned because of shutdown.
    Cancelled,
}

/// Marks a worker busy for as long as it is alive, even across panics.
struct ActiveWorker<'a> {
    stats: &'a RunStatistics,
    worker: usize,
}

impl<'a> ActiveWorker<'a> {
    fn enter(stats: &'a RunStatistics, worker: usize) -> Self {
        stats.worker_started(worker);
        Self { stats, worker }
    }
}

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        self.stats.worker_finished(self.worker);
    }
}

pub(super) async fn process_document(
    worker: usize,
    record: DocumentRecord,
    fetcher: Fetcher,
    retry_policy: RetryPolicy,
    reporter: StatusReporter,
    shutdown: ShutdownToken,
) -> DocumentOutcome {
    let stats = Arc::clone(reporter.stats());
    let _active = ActiveWorker::enter(&stats, worker);

    let result = {
        let fetcher = &fetcher;
        let record = &record;
        run_attempts(&retry_policy, &shutdown, &record.id, move |_| {
            fetcher.attempt(record)
        })
        .await
    };

    let (cause, attempts) = match result.outcome {
        AttemptOutcome::Success(success) => {
            reporter
                .report_success(&record, &success, result.attempts)
                .await;
            return if success.skipped {
                DocumentOutcome::Skipped
            } else {
                DocumentOutcome::Downloaded
            };
        }
        AttemptOutcome::Cancelled => {
            reporter.report_cancelled(&record, result.attempts);
            return DocumentOutcome::Cancelled;
        }
        AttemptOutcome::PermanentFailure { cause, attempts } => (cause, attempts),
        AttemptOutcome::TransientFailure(cause) => (cause, result.attempts),
    };

    let placeholder = match fetcher.write_placeholder(&record, &cause, attempts).await {
        Ok(locator) => Some(locator),
        Err(e) => {
            warn!(id = %record.id, error = %e, "failed to write placeholder");
            None
        }
    };
    reporter
        .report_failure(&record, &cause, attempts, placeholder.as_ref())
        .await;

    if placeholder.is_some() {
        DocumentOutcome::UrlOnly
    } else {
        DocumentOutcome::Failed
    }
}

/// Records a task that panicked or was aborted as a failed document.
pub(super) async fn handle_task_join_error(
    reporter: &StatusReporter,
    record: &DocumentRecord,
    join_error: JoinError,
) {
    warn!(
        id = %record.id,
        error = %join_error,
        "document task panicked"
    );
    let cause = FailureCause::new(FailureKind::Internal, format!("task panic: {join_error}"));
    reporter.report_failure(record, &cause, 0, None).await;
}
