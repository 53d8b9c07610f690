//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is shared by every task a client spawns (pipeline,
//! forwarding, receiving) and by the binaries' main loops. Triggering it,
//! either programmatically or through SIGTERM/SIGINT, makes every
//! [`ShutdownSignal::cancelled`] future resolve, including ones created
//! after the trigger.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway_relay::shutdown::ShutdownSignal;
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = ShutdownSignal::new();
//!
//!     let worker_shutdown = shutdown.clone();
//!     tokio::spawn(async move {
//!         loop {
//!             tokio::select! {
//!                 _ = worker_shutdown.cancelled() => break,
//!                 // ... process payloads
//!             }
//!         }
//!     });
//!
//!     // Wait for SIGTERM / Ctrl+C, then notify everyone
//!     shutdown.wait().await;
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Default shutdown timeout in seconds.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 30;

/// A signal for coordinating graceful shutdown across components.
#[derive(Clone)]
pub struct ShutdownSignal {
    /// Broadcast sender for shutdown notification
    sender: broadcast::Sender<()>,
    /// Set once shutdown was triggered
    triggered: Arc<AtomicBool>,
    /// Shutdown timeout duration
    timeout: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with default timeout (30 seconds).
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    /// Create a new shutdown signal with custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// Get the shutdown timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for SIGTERM or SIGINT, then trigger shutdown.
    ///
    /// Returns early if shutdown is triggered some other way first.
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.cancelled() => {
                return;
            }
        }

        self.notify();
    }

    /// Subscribe to shutdown notifications.
    ///
    /// The receiver only sees triggers that happen after this call; prefer
    /// [`cancelled`](Self::cancelled).
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Resolves once shutdown has been triggered, immediately if it already
    /// was.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        if self.is_shutdown() {
            return;
        }
        // `self` holds a sender, so the channel cannot close under us.
        let _ = receiver.recv().await;
    }

    /// Check if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Trigger shutdown manually (for testing or programmatic shutdown).
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        self.notify();
    }

    fn notify(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    /// Wait for shutdown with a timeout.
    ///
    /// Returns `true` if shutdown was triggered within the timeout.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => true,
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Shutdown timeout reached, forcing shutdown"
                );
                false
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal_creation() {
        let signal = ShutdownSignal::new();
        assert_eq!(signal.timeout(), Duration::from_secs(30));
        assert!(!signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_custom_timeout() {
        let signal = ShutdownSignal::with_timeout(Duration::from_secs(60));
        assert_eq!(signal.timeout(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let signal = ShutdownSignal::new();
        let mut receiver = signal.subscribe();

        let trigger_signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger_signal.trigger();
        });

        let result = tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await;
        assert!(result.is_ok());
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_clone_receives_signal() {
        let signal = ShutdownSignal::new();
        let signal2 = signal.clone();

        let mut receiver1 = signal.subscribe();
        let mut receiver2 = signal2.subscribe();

        signal.trigger();

        assert!(receiver1.recv().await.is_ok());
        assert!(receiver2.recv().await.is_ok());
        assert!(signal2.is_shutdown());
    }

    #[tokio::test]
    async fn test_cancelled_after_trigger_resolves() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let result = tokio::time::timeout(Duration::from_millis(100), signal.cancelled()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_with_timeout() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_with_timeout(Duration::from_millis(10)).await);

        signal.trigger();
        assert!(signal.wait_with_timeout(Duration::from_millis(10)).await);
    }
}
