//! Shared run statistics.
//!
//! All counters live behind one mutex. Callers lock only to update or copy
//! counters; no lock is ever held across an `.await`.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::retry::FetchSuccess;
use crate::failure::FailureRecord;

/// Aggregate counters for one run.
#[derive(Debug, Default)]
pub struct RunStatistics {
    inner: Mutex<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    total: usize,
    downloaded: usize,
    skipped: usize,
    url_only: usize,
    failed: usize,
    cancelled: usize,
    bytes: u64,
    retries: u64,
    active: BTreeSet<usize>,
    failures: Vec<FailureRecord>,
}

/// Point-in-time copy of [`RunStatistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Documents in this run.
    pub total: usize,
    /// Documents fetched and stored during this run.
    pub downloaded: usize,
    /// Documents already present in storage.
    pub skipped: usize,
    /// Failed documents preserved as placeholders (subset of `failed`).
    pub url_only: usize,
    /// Documents that ended without their payload stored.
    pub failed: usize,
    /// Documents abandoned because of shutdown.
    pub cancelled: usize,
    /// Bytes transferred.
    pub bytes: u64,
    /// Retry attempts made across all documents.
    pub retries: u64,
    /// Workers currently processing a document.
    pub active_workers: Vec<usize>,
}

impl StatsSnapshot {
    /// Documents that reached a terminal status.
    #[must_use]
    pub fn terminal(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }

    /// Documents whose worker has finished, including cancelled ones.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.terminal() + self.cancelled
    }
}

impl RunStatistics {
    /// Creates statistics for a run over `total` documents.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                total,
                ..StatsInner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Updates the document total.
    pub fn set_total(&self, total: usize) {
        self.lock().total = total;
    }

    /// Marks `worker` as busy.
    pub fn worker_started(&self, worker: usize) {
        self.lock().active.insert(worker);
    }

    /// Marks `worker` as idle.
    pub fn worker_finished(&self, worker: usize) {
        self.lock().active.remove(&worker);
    }

    /// Records a stored or skipped document.
    pub fn record_success(&self, success: &FetchSuccess, attempts: u32) {
        let mut inner = self.lock();
        if success.skipped {
            inner.skipped += 1;
        } else {
            inner.downloaded += 1;
            inner.bytes += success.bytes;
        }
        inner.retries += u64::from(attempts.saturating_sub(1));
    }

    /// Records a permanently failed document.
    pub fn record_failure(&self, failure: FailureRecord, placeholder_written: bool) {
        let mut inner = self.lock();
        inner.failed += 1;
        if placeholder_written {
            inner.url_only += 1;
        }
        inner.retries += u64::from(failure.attempts.saturating_sub(1));
        inner.failures.push(failure);
    }

    /// Records a document abandoned because of shutdown.
    pub fn record_cancelled(&self, attempts: u32) {
        let mut inner = self.lock();
        inner.cancelled += 1;
        inner.retries += u64::from(attempts.saturating_sub(1));
    }

    /// Copies the current counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        StatsSnapshot {
            total: inner.total,
            downloaded: inner.downloaded,
            skipped: inner.skipped,
            url_only: inner.url_only,
            failed: inner.failed,
            cancelled: inner.cancelled,
            bytes: inner.bytes,
            retries: inner.retries,
            active_workers: inner.active.iter().copied().collect(),
        }
    }

    /// Copies the failure records collected so far.
    #[must_use]
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.lock().failures.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::document::{DocumentRecord, DocumentStatus, StorageLocator};
    use crate::download::{FailureCause, FailureKind};

    fn success(skipped: bool, bytes: u64) -> FetchSuccess {
        FetchSuccess {
            locator: StorageLocator::parse("a/b.pdf").unwrap(),
            bytes,
            elapsed: Duration::ZERO,
            skipped,
        }
    }

    #[test]
    fn test_counts_by_outcome() {
        let stats = RunStatistics::new(4);
        stats.record_success(&success(false, 10), 2);
        stats.record_success(&success(true, 0), 1);
        let record = DocumentRecord::new("x", "https://h/x.pdf");
        let cause = FailureCause::new(FailureKind::Timeout, "t");
        stats.record_failure(
            FailureRecord::new(&record, &cause, 4, DocumentStatus::UrlOnly, None),
            true,
        );
        stats.record_cancelled(1);

        let snap = stats.snapshot();
        assert_eq!(snap.downloaded, 1);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.url_only, 1);
        assert_eq!(snap.cancelled, 1);
        assert_eq!(snap.bytes, 10);
        assert_eq!(snap.retries, 4);
        assert_eq!(snap.terminal(), 3);
        assert_eq!(snap.processed(), 4);
        assert_eq!(stats.failures().len(), 1);
    }

    #[test]
    fn test_active_worker_tracking() {
        let stats = RunStatistics::new(2);
        stats.worker_started(2);
        stats.worker_started(1);
        assert_eq!(stats.snapshot().active_workers, vec![1, 2]);
        stats.worker_finished(2);
        assert_eq!(stats.snapshot().active_workers, vec![1]);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let stats = Arc::new(RunStatistics::new(800));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.worker_started(worker);
                        stats.record_success(&success(false, 1), 1);
                        stats.worker_finished(worker);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.downloaded, 800);
        assert_eq!(snap.bytes, 800);
        assert!(snap.active_workers.is_empty());
    }
}
