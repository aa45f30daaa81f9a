//! Pong-based liveness monitoring.
//!
//! The session writer sends a ping every interval. This monitor only
//! watches for the answers.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::connection::ClientConnection;

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No pong (or other inbound frame) for longer than the timeout.
    TimedOut {
        /// How long the client had been silent.
        silent_for: Duration,
    },
    /// The connection's close token fired.
    Closed,
}

/// Watch `connection` until it goes silent for `timeout` or is closed.
///
/// Checks every `interval`. A tick where the alive flag was set resets the
/// silence clock; otherwise the time since the last pong is compared with
/// `timeout`.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let _ = ticker.tick().await;
    let close = connection.close_token().clone();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.check_alive() {
                    continue;
                }
                let silent_for = connection.last_pong_elapsed();
                if silent_for >= timeout {
                    return HeartbeatResult::TimedOut { silent_for };
                }
            }
            () = close.cancelled() => return HeartbeatResult::Closed,
        }
    }
}
