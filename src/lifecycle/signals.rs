//! Two-stage interrupt handling.
//!
//! The first SIGINT/SIGTERM sets the [`ShutdownToken`] so workers finish
//! their current attempt and the orchestrator stops submitting. A second
//! signal terminates the process immediately with exit code 130.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::ShutdownToken;

/// Exit code used when the run is interrupted.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// What the interrupt handler decided once it stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// The signal source closed; nothing more to do.
    SourceClosed,
    /// A second interrupt arrived; the process must exit now.
    ForceExit,
}

/// Consumes interrupt notifications from `signals`.
///
/// The first notification cancels `shutdown`; the second returns
/// [`InterruptAction::ForceExit`].
pub async fn handle_interrupts(
    shutdown: ShutdownToken,
    mut signals: mpsc::Receiver<()>,
) -> InterruptAction {
    if signals.recv().await.is_none() {
        return InterruptAction::SourceClosed;
    }
    if !shutdown.is_cancelled() {
        shutdown.cancel();
        warn!("interrupt received; finishing in-flight documents (interrupt again to force exit)");
    }

    if signals.recv().await.is_none() {
        return InterruptAction::SourceClosed;
    }
    error!("second interrupt received; exiting immediately");
    InterruptAction::ForceExit
}

/// Installs OS signal listeners and the two-stage escalation task.
///
/// Must be called from within a tokio runtime.
pub fn spawn_signal_handler(shutdown: ShutdownToken) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        let mut listener = SignalListener::install();
        while listener.recv().await {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        if handle_interrupts(shutdown, rx).await == InterruptAction::ForceExit {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    })
}

#[cfg(unix)]
struct SignalListener {
    sigint: Option<tokio::signal::unix::Signal>,
    sigterm: Option<tokio::signal::unix::Signal>,
}

#[cfg(unix)]
impl SignalListener {
    fn install() -> Self {
        use tokio::signal::unix::{SignalKind, signal};

        // Registration may fail in restricted environments (containers, tests).
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| warn!(error = %e, "could not register SIGINT handler"))
            .ok();
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| warn!(error = %e, "could not register SIGTERM handler"))
            .ok();
        Self { sigint, sigterm }
    }

    /// Waits for the next signal; false when no further signals can arrive.
    async fn recv(&mut self) -> bool {
        match (self.sigint.as_mut(), self.sigterm.as_mut()) {
            (Some(sigint), Some(sigterm)) => {
                tokio::select! {
                    received = sigint.recv() => {
                        info!("received SIGINT (Ctrl+C)");
                        received.is_some()
                    }
                    received = sigterm.recv() => {
                        info!("received SIGTERM");
                        received.is_some()
                    }
                }
            }
            (Some(sigint), None) => sigint.recv().await.is_some(),
            (None, Some(sigterm)) => sigterm.recv().await.is_some(),
            (None, None) => {
                error!("no signal handlers registered, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.is_ok()
            }
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    fn install() -> Self {
        Self
    }

    async fn recv(&mut self) -> bool {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to listen for Ctrl+C");
                false
            }
        }
    }
}
