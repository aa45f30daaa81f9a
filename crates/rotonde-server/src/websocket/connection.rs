//! WebSocket client connection state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use rotonde_core::{ConnectionId, Envelope};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::metrics::SEND_QUEUE_OVERFLOWS_TOTAL;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Registered, definitions being replayed. Not yet routable.
    Connecting = 0,
    /// Routable.
    Open = 1,
    /// Teardown requested. Nothing more is delivered to it.
    Closing = 2,
    /// Removed from the broker.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded to the last ping.
    pub is_alive: AtomicBool,
    /// When the last pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Frames dropped because the queue was full or closed.
    pub dropped_messages: AtomicU64,
    state: AtomicU8,
    close: CancellationToken,
}

impl ClientConnection {
    /// Create a connection in [`ConnectionState::Connecting`].
    ///
    /// `close` is cancelled when the connection must be torn down.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>, close: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether envelopes may be routed to and from this connection.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Move `Connecting → Open`. Returns `false` if the connection had
    /// already started closing.
    pub fn open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to [`ConnectionState::Closing`] and signal the session to stop.
    ///
    /// Returns `true` for the call that performed the transition.
    pub fn begin_close(&self) -> bool {
        let prev = self
            .state
            .fetch_max(ConnectionState::Closing as u8, Ordering::AcqRel);
        self.close.cancel();
        prev < ConnectionState::Closing as u8
    }

    /// Mark as [`ConnectionState::Closed`].
    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.close.cancel();
    }

    /// Token cancelled when this connection must stop.
    pub fn close_token(&self) -> &CancellationToken {
        &self.close
    }

    /// Enqueue a text frame.
    ///
    /// Never blocks. A full queue means the client cannot keep up, so the
    /// connection is moved to closing. Returns `false` if the frame was not
    /// queued.
    pub fn send(&self, message: Arc<String>) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                if self.begin_close() {
                    counter!(SEND_QUEUE_OVERFLOWS_TOTAL).increment(1);
                    warn!(conn_id = %self.id, "send queue full, closing slow connection");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Serialize an envelope and enqueue it.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                error!(conn_id = %self.id, error = %e, "failed to serialize envelope");
                false
            }
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotonde_core::{BrokerError, Envelope};

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(
            ConnectionId::from_raw("conn_1"),
            tx,
            CancellationToken::new(),
        );
        (conn, rx)
    }

    #[test]
    fn starts_connecting_then_opens() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_open());
        assert!(conn.open());
        assert!(conn.is_open());
        assert!(!conn.open());
    }

    #[test]
    fn closing_cannot_reopen() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.begin_close());
        assert!(!conn.begin_close());
        assert!(!conn.open());
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.close_token().is_cancelled());
    }

    #[test]
    fn closed_is_terminal() {
        let (conn, _rx) = make_connection(4);
        let _ = conn.open();
        conn.mark_closed();
        assert!(!conn.begin_close());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.send(Arc::new("hello".into())));
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[tokio::test]
    async fn full_queue_begins_close() {
        let (conn, _rx) = make_connection(1);
        let _ = conn.open();
        assert!(conn.send(Arc::new("msg1".into())));
        assert!(!conn.send(Arc::new("msg2".into())));
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.close_token().is_cancelled());
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.send(Arc::new("hello".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_envelope_serializes() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.send_envelope(&Envelope::error(&BrokerError::not_found("X"))));
        let msg = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["payload"]["code"], "NOT_FOUND");
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Closing.as_str(), "closing");
    }
}
