//! Graceful shutdown handling for the nodeflow binary.
//!
//! `ShutdownCoordinator` listens for SIGTERM/SIGINT (Ctrl+C elsewhere) and
//! exposes the request as a [`CancellationToken`], so a running execution can
//! be cancelled cooperatively when the user interrupts the process.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates graceful shutdown across the application.
///
/// # Example
///
/// ```rust
/// use nodeflow::shutdown::ShutdownCoordinator;
///
/// async fn example() {
///     let coordinator = ShutdownCoordinator::new();
///
///     if coordinator.is_shutdown_requested() {
///         return;
///     }
///
///     coordinator.wait_for_shutdown().await;
/// }
/// ```
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled when shutdown is requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown. Can be called multiple times safely.
    pub fn request_shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown requested");
            self.token.cancel();
        }
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for shutdown to be requested. Returns immediately if it already was.
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Start a cross-platform signal listener.
    ///
    /// On Unix: listens for SIGTERM and SIGINT
    /// On Windows: listens for Ctrl+C (ctrl_c)
    pub fn start_signal_listener(&self) {
        let coordinator = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate())
                {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to create SIGTERM handler: {}", e);
                        // Fall back to ctrl_c only
                        signal::ctrl_c().await.ok();
                        coordinator.request_shutdown();
                        return;
                    }
                };
                let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to create SIGINT handler: {}", e);
                        sigterm.recv().await;
                        coordinator.request_shutdown();
                        return;
                    }
                };

                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, cancelling");
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT, cancelling");
                    }
                    _ = coordinator.wait_for_shutdown() => return,
                }
            }

            #[cfg(not(unix))]
            {
                tokio::select! {
                    result = signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!("Failed to listen for Ctrl+C: {}", e);
                            return;
                        }
                        info!("Received Ctrl+C, cancelling");
                    }
                    _ = coordinator.wait_for_shutdown() => return,
                }
            }

            coordinator.request_shutdown();
        });
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("shutdown_requested", &self.is_shutdown_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_request() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_requested());

        coordinator.request_shutdown();

        assert!(coordinator.is_shutdown_requested());
        assert!(coordinator.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_wait_already_requested() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown();

        let result =
            tokio::time::timeout(Duration::from_millis(100), coordinator.wait_for_shutdown()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_wait_then_request() {
        let coordinator = ShutdownCoordinator::new();
        let coordinator2 = coordinator.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            coordinator2.request_shutdown();
        });

        let result =
            tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown()).await;

        assert!(result.is_ok());
        assert!(coordinator.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_multiple_shutdown_requests() {
        let coordinator = ShutdownCoordinator::new();

        coordinator.request_shutdown();
        coordinator.request_shutdown();
        coordinator.request_shutdown();

        assert!(coordinator.is_shutdown_requested());
    }
}
