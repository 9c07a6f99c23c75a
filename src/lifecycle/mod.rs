//! Run lifecycle: cooperative shutdown, heartbeat reporting, and signal
//! escalation.

mod heartbeat;
mod signals;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

pub use heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, Heartbeat, heartbeat_line};
pub use signals::{INTERRUPTED_EXIT_CODE, InterruptAction, handle_interrupts, spawn_signal_handler};

/// Process-wide cooperative cancellation flag.
///
/// Set once and observed at every loop boundary: the orchestrator's
/// submission loop, the top of each fetch attempt, after each streamed
/// chunk, during backoff sleeps, and in the heartbeat loop. Clones share the
/// same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    token: CancellationToken,
}

impl ShutdownToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Repeated calls are no-ops.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when shutdown is requested (immediately if it already was).
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let token = ShutdownToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = ShutdownToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_already_set() {
        let token = ShutdownToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .unwrap();
    }
}
