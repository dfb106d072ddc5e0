//! Graceful shutdown coordination for Bossfeed.
//!
//! A [`ShutdownSignal`] is shared between the signal listener and the relay
//! loop. Once triggered, the relay stops pulling messages, finishes the event
//! it is delivering and writes its metrics.
//!
//! # Example
//!
//! ```rust,ignore
//! use bossfeed::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let listener = shutdown.clone();
//! tokio::spawn(async move { listener.wait().await });
//!
//! relay.run(&mut source, &shutdown).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A signal for coordinating graceful shutdown.
///
/// Clones share the same state, so triggering one notifies every holder.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wait for SIGINT or SIGTERM, then notify all subscribers.
    ///
    /// If no handler can be installed this waits forever rather than
    /// triggering a spurious shutdown.
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, stopping after the current event");
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping after the current event");
            }
        }

        self.notify();
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Non-blocking check for whether shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested.
    ///
    /// Returns immediately if it already was.
    pub async fn recv(&self) {
        let mut receiver = self.sender.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = receiver.recv().await;
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
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

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
    async fn test_recv_after_trigger_returns_immediately() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());

        signal.trigger();

        let result = tokio::time::timeout(Duration::from_millis(50), signal.recv()).await;
        assert!(result.is_ok());
    }
}
