//! Process-wide shutdown signal.
//!
//! A [`ShutdownController`] wraps a `watch` channel holding a single flag.
//! The flag starts `false`, is set to `true` at most once, and is never
//! cleared. Every blocking point in the bridge (connect, read, backoff sleep,
//! session open, publish) races against [`ShutdownController::cancelled`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Result of [`ShutdownController::wait_or`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration elapsed.
    TimedOut,
    /// Shutdown was requested before the duration elapsed.
    Shutdown,
}

/// Cloneable handle to the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownController {
    /// Create a controller with the flag unset.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag and wake every waiter. Idempotent.
    pub fn request_shutdown(&self) {
        let already_set = self.tx.send_replace(true);
        if !already_set {
            tracing::info!("Shutdown requested");
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Sleep for `duration` unless shutdown is requested first.
    pub async fn wait_or(&self, duration: Duration) -> WaitOutcome {
        if self.is_shutdown_requested() {
            return WaitOutcome::Shutdown;
        }

        tokio::select! {
            _ = self.cancelled() => WaitOutcome::Shutdown,
            _ = tokio::time::sleep(duration) => WaitOutcome::TimedOut,
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task that requests shutdown on SIGINT (Ctrl+C) or SIGTERM.
pub fn listen_for_signals(shutdown: ShutdownController) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => tracing::info!("Received Ctrl+C, shutting down..."),
                    Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
                }
            }
            _ = terminate() => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
            _ = shutdown.cancelled() => return,
        }

        shutdown.request_shutdown();
    })
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
