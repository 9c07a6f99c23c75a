//! Final run report: summary rendering and the process exit convention.

use std::time::Duration;

use crate::download::StatsSnapshot;
use crate::failure::{FailureAnalysis, FailureRecord, analyze};

/// How the process should exit after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// At least one document was newly fetched and nothing failed.
    Success,
    /// Nothing new was fetched (every document skipped, or no documents).
    NothingNew,
    /// One or more documents ended as `URL_ONLY` or `FAILED`.
    Failures,
    /// Configuration or startup failed before any worker ran.
    StartupFailure,
    /// The run was interrupted.
    Interrupted,
}

impl ExitOutcome {
    /// Process exit code.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::NothingNew => 1,
            Self::Failures => 2,
            Self::StartupFailure => 3,
            Self::Interrupted => crate::lifecycle::INTERRUPTED_EXIT_CODE,
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Documents considered after deduplication and the optional cap.
    pub total: usize,
    /// Documents handed to a worker.
    pub submitted: usize,
    /// Final counters.
    pub stats: StatsSnapshot,
    /// One record per document that did not get its payload stored.
    pub failures: Vec<FailureRecord>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Whether shutdown was requested during the run.
    pub interrupted: bool,
}

impl RunReport {
    /// Assembles a report.
    #[must_use]
    pub fn new(
        total: usize,
        submitted: usize,
        stats: StatsSnapshot,
        failures: Vec<FailureRecord>,
        elapsed: Duration,
        interrupted: bool,
    ) -> Self {
        Self {
            total,
            submitted,
            stats,
            failures,
            elapsed,
            interrupted,
        }
    }

    /// Documents never handed to a worker because of shutdown.
    #[must_use]
    pub fn not_submitted(&self) -> usize {
        self.total.saturating_sub(self.submitted)
    }

    /// Share of all documents now present in storage, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.stats.downloaded + self.stats.skipped) as f64 * 100.0 / self.total as f64
    }

    /// Documents finished per minute of wall time.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput_per_minute(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.stats.terminal() as f64 * 60.0 / secs
    }

    /// Breakdown of this run's failures.
    #[must_use]
    pub fn failure_analysis(&self) -> FailureAnalysis {
        analyze(&self.failures)
    }

    /// Lines of the final summary, without the failure analysis.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let stats = &self.stats;
        let mut lines = vec![
            "Download summary:".to_string(),
            format!("  Total documents:  {}", self.total),
            format!("  Downloaded:       {}", stats.downloaded),
            format!("  Already present:  {}", stats.skipped),
            format!("  URL only:         {}", stats.url_only),
            format!("  Failed:           {}", stats.failed - stats.url_only.min(stats.failed)),
        ];
        if self.interrupted {
            lines.push(format!("  Cancelled:        {}", stats.cancelled));
            lines.push(format!("  Not submitted:    {}", self.not_submitted()));
        }
        lines.push(format!("  Bytes fetched:    {}", stats.bytes));
        lines.push(format!("  Retries:          {}", stats.retries));
        lines.push(format!("  Success rate:     {:.1}%", self.success_rate()));
        lines.push(format!("  Elapsed:          {:.1}s", self.elapsed.as_secs_f64()));
        lines.push(format!(
            "  Throughput:       {:.1} documents/minute",
            self.throughput_per_minute()
        ));
        if self.interrupted {
            lines.push("Run interrupted; re-run to resume where it stopped.".to_string());
        }
        lines
    }

    /// Maps the run to an exit outcome. Interruption wins over everything
    /// else, then failures, then whether anything new was fetched.
    #[must_use]
    pub fn exit_outcome(&self) -> ExitOutcome {
        if self.interrupted {
            ExitOutcome::Interrupted
        } else if self.stats.failed > 0 {
            ExitOutcome::Failures
        } else if self.stats.downloaded > 0 {
            ExitOutcome::Success
        } else {
            ExitOutcome::NothingNew
        }
    }
}
