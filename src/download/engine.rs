//! Task orchestrator: a bounded worker pool over a batch of documents.
//!
//! The engine submits one task per [`DocumentRecord`] to a fixed-size pool,
//! consumes completions as they arrive, and reports progress along the way.
//! Each task runs the retry controller around the fetch unit and routes its
//! terminal outcome through the [`StatusReporter`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docfetch_core::document::DocumentRecord;
//! use docfetch_core::download::{DownloadEngine, Fetcher, HttpClient, RetryPolicy, RunStatistics};
//! use docfetch_core::lifecycle::ShutdownToken;
//! use docfetch_core::status::{NoopStatusSink, StatusReporter};
//! use docfetch_core::storage::LocalStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let shutdown = ShutdownToken::new();
//! let storage = Arc::new(LocalStorage::create("./pdfs".into()).await?);
//! let fetcher = Fetcher::new(HttpClient::with_defaults()?, storage, shutdown.clone());
//! let reporter = StatusReporter::new(Arc::new(RunStatistics::new(0)), Arc::new(NoopStatusSink));
//!
//! let engine = DownloadEngine::new(3, RetryPolicy::default())?;
//! let documents = vec![DocumentRecord::new("42", "https://example.com/report.pdf")];
//! let report = engine.run(documents, fetcher, reporter, shutdown).await?;
//! println!("downloaded {}", report.stats.downloaded);
//! # Ok(())
//! # }
//! ```

mod task;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::constants::{MAX_WORKERS, MIN_WORKERS, PROGRESS_EVERY_COMPLETIONS, PROGRESS_INTERVAL};
use super::fetch::Fetcher;
use super::retry::RetryPolicy;
use crate::document::{DocumentRecord, StorageLocator};
use crate::lifecycle::ShutdownToken;
use crate::report::RunReport;
use crate::status::StatusReporter;

pub use task::DocumentOutcome;

use task::{handle_task_join_error, process_document};

/// Error type for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid worker count provided.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Bounded worker pool that drives a batch of documents to terminal states.
///
/// # Concurrency Model
///
/// - Each document runs in its own Tokio task inside a [`JoinSet`]
/// - A semaphore permit is acquired before a task is spawned, so at most
///   `workers` documents are in flight
/// - Permits are released automatically when tasks complete (RAII)
/// - Completions are consumed in completion order, not submission order
/// - One task owns one document's whole attempt sequence
///
/// # Cancellation
///
/// Once the shutdown token fires, no further documents are submitted. Tasks
/// already running notice the token at their next attempt boundary or
/// network chunk and end as cancelled; the engine waits for all of them
/// before returning.
#[derive(Debug)]
pub struct DownloadEngine {
    semaphore: Arc<Semaphore>,
    workers: usize,
    retry_policy: RetryPolicy,
    max_downloads: Option<usize>,
}

impl DownloadEngine {
    /// Creates an engine with `workers` concurrent slots.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWorkers`] if the value is outside
    /// the valid range (1-64).
    #[instrument(level = "debug", skip(retry_policy))]
    pub fn new(workers: usize, retry_policy: RetryPolicy) -> Result<Self, EngineError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(EngineError::InvalidWorkers { value: workers });
        }

        debug!(
            workers,
            max_retries = retry_policy.max_retries(),
            base_delay_ms = retry_policy.base_delay().as_millis(),
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
            retry_policy,
            max_downloads: None,
        })
    }

    /// Caps how many documents a run will consider.
    #[must_use]
    pub fn with_max_downloads(mut self, max_downloads: Option<usize>) -> Self {
        self.max_downloads = max_downloads;
        self
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Processes every document and returns the run report.
    ///
    /// Duplicate ids are dropped (first occurrence wins) before the optional
    /// cap is applied, so no two workers ever own the same document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the pool's semaphore is
    /// closed. Individual document failures never make this method fail.
    #[instrument(skip_all, fields(documents = documents.len(), workers = self.workers))]
    pub async fn run(
        &self,
        documents: Vec<DocumentRecord>,
        fetcher: Fetcher,
        reporter: StatusReporter,
        shutdown: ShutdownToken,
    ) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let mut pending = self.prepare(documents);
        let total = pending.len();
        let stats = Arc::clone(reporter.stats());
        stats.set_total(total);

        log_document_analysis(&pending);
        info!(total, workers = self.workers, "starting download run");

        let mut join_set = JoinSet::new();
        let mut in_flight: HashMap<Id, (usize, DocumentRecord)> = HashMap::new();
        let mut free_workers: Vec<usize> = (1..=self.workers).rev().collect();
        let mut accepting = true;
        let mut submitted = 0usize;
        let mut completed = 0usize;
        let mut last_progress = Instant::now();

        loop {
            let can_submit = accepting && !pending.is_empty();

            tokio::select! {
                biased;

                () = shutdown.cancelled(), if can_submit => {
                    info!(
                        remaining = pending.len(),
                        in_flight = join_set.len(),
                        "shutdown requested, no further documents will be submitted"
                    );
                    accepting = false;
                }

                Some(joined) = join_set.join_next_with_id(), if !join_set.is_empty() => {
                    let (id, outcome) = match joined {
                        Ok((id, outcome)) => (id, Some(outcome)),
                        Err(join_error) => {
                            let id = join_error.id();
                            if let Some((_, record)) = in_flight.get(&id) {
                                handle_task_join_error(&reporter, record, join_error).await;
                            } else {
                                warn!(error = %join_error, "untracked document task failed");
                            }
                            (id, None)
                        }
                    };
                    if let Some((worker, record)) = in_flight.remove(&id) {
                        free_workers.push(worker);
                        debug!(id = %record.id, worker, ?outcome, "document finished");
                    }

                    completed += 1;
                    if completed % PROGRESS_EVERY_COMPLETIONS == 0
                        || last_progress.elapsed() >= PROGRESS_INTERVAL
                    {
                        log_progress(&reporter, started);
                        last_progress = Instant::now();
                    }
                }

                permit = Arc::clone(&self.semaphore).acquire_owned(), if can_submit => {
                    let permit = permit.map_err(|_| EngineError::SemaphoreClosed)?;
                    if shutdown.is_cancelled() {
                        accepting = false;
                        continue;
                    }
                    let Some(record) = pending.pop_front() else {
                        continue;
                    };
                    let worker = free_workers.pop().unwrap_or(submitted % self.workers + 1);

                    let task_record = record.clone();
                    let fetcher = fetcher.clone();
                    let retry_policy = self.retry_policy.clone();
                    let reporter = reporter.clone();
                    let shutdown = shutdown.clone();
                    let handle = join_set.spawn(async move {
                        let _permit = permit;
                        process_document(worker, task_record, fetcher, retry_policy, reporter, shutdown)
                            .await
                    });

                    debug!(id = %record.id, worker, "document submitted");
                    in_flight.insert(handle.id(), (worker, record));
                    submitted += 1;
                }

                else => break,
            }
        }

        let report = RunReport::new(
            total,
            submitted,
            stats.snapshot(),
            stats.failures(),
            started.elapsed(),
            shutdown.is_cancelled(),
        );
        info!(
            total,
            submitted,
            downloaded = report.stats.downloaded,
            skipped = report.stats.skipped,
            failed = report.stats.failed,
            url_only = report.stats.url_only,
            cancelled = report.stats.cancelled,
            elapsed_ms = report.elapsed.as_millis(),
            "download run complete"
        );
        Ok(report)
    }

    fn prepare(&self, documents: Vec<DocumentRecord>) -> VecDeque<DocumentRecord> {
        let mut seen = HashSet::new();
        let mut pending: VecDeque<DocumentRecord> = documents
            .into_iter()
            .filter(|record| {
                let fresh = seen.insert(record.id.clone());
                if !fresh {
                    warn!(id = %record.id, "duplicate document id skipped");
                }
                fresh
            })
            .collect();

        if let Some(limit) = self.max_downloads {
            if pending.len() > limit {
                info!(limit, available = pending.len(), "limiting run to the first documents");
                pending.truncate(limit);
            }
        }
        disambiguate_locators(pending)
    }
}

/// Gives every record whose locator is shared with another record an
/// id-prefixed filename, so no two documents in a run map to one artifact.
fn disambiguate_locators(records: VecDeque<DocumentRecord>) -> VecDeque<DocumentRecord> {
    let mut counts: HashMap<StorageLocator, usize> = HashMap::new();
    for record in &records {
        *counts.entry(record.locator()).or_default() += 1;
    }

    records
        .into_iter()
        .map(|record| {
            let shared = record.locator();
            if counts.get(&shared).copied().unwrap_or(0) < 2 {
                return record;
            }
            let renamed = record.with_id_prefixed_filename();
            warn!(
                id = %renamed.id,
                shared = %shared,
                locator = %renamed.locator(),
                "locator shared with another document; using id-prefixed filename"
            );
            renamed
        })
        .collect()
}

fn log_document_analysis(documents: &VecDeque<DocumentRecord>) {
    let countries: BTreeSet<&str> = documents.iter().map(DocumentRecord::country_label).collect();
    let types: BTreeSet<&str> = documents.iter().map(DocumentRecord::major_type_label).collect();
    info!(
        documents = documents.len(),
        countries = countries.len(),
        document_types = types.len(),
        "document analysis"
    );
}

#[allow(clippy::cast_precision_loss)]
fn log_progress(reporter: &StatusReporter, started: Instant) {
    let snapshot = reporter.stats().snapshot();
    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 {
        snapshot.processed() as f64 * 60.0 / elapsed
    } else {
        0.0
    };
    info!(
        processed = snapshot.processed(),
        total = snapshot.total,
        downloaded = snapshot.downloaded,
        skipped = snapshot.skipped,
        failed = snapshot.failed,
        active_workers = snapshot.active_workers.len(),
        per_minute = %format!("{rate:.1}"),
        "progress"
    );
}
