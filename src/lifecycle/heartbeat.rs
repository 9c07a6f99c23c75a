//! Periodic heartbeat reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::ShutdownToken;
use crate::download::{RunStatistics, StatsSnapshot};

/// Default heartbeat interval (30 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that logs a status line at a fixed interval.
///
/// Stops when [`Heartbeat::stop`] is called or the shutdown token fires.
#[derive(Debug)]
pub struct Heartbeat {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<u64>,
}

impl Heartbeat {
    /// Starts the heartbeat loop.
    #[must_use]
    pub fn spawn(stats: Arc<RunStatistics>, shutdown: ShutdownToken, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let interval = interval.max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut beats = 0u64;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    () = shutdown.cancelled() => {
                        debug!("heartbeat stopping on shutdown");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Some(line) = heartbeat_line(&stats.snapshot()) {
                            info!(target: "docfetch::heartbeat", "{line}");
                            beats += 1;
                        }
                    }
                }
            }
            beats
        });

        Self {
            stop: Some(stop_tx),
            handle,
        }
    }

    /// Stops the loop and returns how many heartbeat lines were emitted.
    pub async fn stop(mut self) -> u64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap_or(0)
    }
}

/// Formats a heartbeat line, or `None` when there is nothing to report yet.
#[must_use]
pub fn heartbeat_line(snapshot: &StatsSnapshot) -> Option<String> {
    if snapshot.processed() == 0 && snapshot.active_workers.is_empty() {
        return None;
    }
    Some(format!(
        "heartbeat: {}/{} processed ({} downloaded, {} skipped, {} failed), {} active workers",
        snapshot.processed(),
        snapshot.total,
        snapshot.downloaded,
        snapshot.skipped,
        snapshot.failed,
        snapshot.active_workers.len()
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_line_silent_before_work_starts() {
        assert_eq!(heartbeat_line(&StatsSnapshot::default()), None);
        let snapshot = StatsSnapshot {
            total: 10,
            downloaded: 2,
            failed: 1,
            active_workers: vec![1, 2],
            ..StatsSnapshot::default()
        };
        assert_eq!(
            heartbeat_line(&snapshot).unwrap(),
            "heartbeat: 3/10 processed (2 downloaded, 0 skipped, 1 failed), 2 active workers"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_emits_each_interval_while_busy() {
        let stats = Arc::new(RunStatistics::new(5));
        stats.worker_started(1);
        let heartbeat = Heartbeat::spawn(
            Arc::clone(&stats),
            ShutdownToken::new(),
            Duration::from_secs(30),
        );

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(heartbeat.stop().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_on_shutdown() {
        let shutdown = ShutdownToken::new();
        let heartbeat = Heartbeat::spawn(
            Arc::new(RunStatistics::new(1)),
            shutdown.clone(),
            Duration::from_secs(30),
        );
        shutdown.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(heartbeat.handle.is_finished());
        assert_eq!(heartbeat.stop().await, 0);
    }
}
