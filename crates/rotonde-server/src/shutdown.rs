//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Coordinates graceful shutdown across the listener and every session.
///
/// Session close tokens are children of [`token`](Self::token), so
/// cancelling it ends every session through its normal teardown path.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker that session tasks are spawned on.
    pub fn sessions(&self) -> &TaskTracker {
        &self.sessions
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything, then wait up to `timeout` for tracked sessions and
    /// `handles` to finish.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.sessions.close();
        info!(
            sessions = self.sessions.len(),
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions to drain"
        );

        let drain = async {
            self.sessions.wait().await;
            let _ = futures::future::join_all(handles).await;
        };

        if tokio::time::timeout(timeout, drain).await.is_ok() {
            info!("shutdown complete");
            true
        } else {
            warn!("shutdown timed out after {timeout:?}, some sessions may still be running");
            false
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn child_tokens_follow_shutdown() {
        let coord = ShutdownCoordinator::new();
        let child = coord.token().child_token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_sessions() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let _session = coord.sessions().spawn(async move {
            token.cancelled().await;
        });

        assert!(coord.graceful_shutdown(Vec::new(), Duration::from_secs(5)).await);
        assert!(coord.sessions().is_empty());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_handles() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        assert!(coord.graceful_shutdown(vec![handle], Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let _stuck = coord.sessions().spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        assert!(!coord.graceful_shutdown(Vec::new(), Duration::from_millis(100)).await);
        assert!(coord.is_shutting_down());
    }
}
