//! WebSocket session lifecycle: one task per client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use metrics::counter;
use rotonde_core::BrokerError;
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, instrument, warn};

use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::manager::ConnectionManager;
use crate::metrics::HEARTBEAT_TIMEOUTS_TOTAL;

/// How long the writer gets to flush a close frame after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Ping cadence and pong deadline for a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionTiming {
    /// Time between server pings.
    pub ping_interval: Duration,
    /// Silence allowed before the session is closed.
    pub pong_timeout: Duration,
}

/// Forward queued frames to `sink` and ping every `ping_interval`.
///
/// Stops when the queue closes, a write fails or `close` fires. On close,
/// frames already queued are written before the Close frame.
async fn forward_outbound<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Arc<String>>,
    close: CancellationToken,
    ping_interval: Duration,
) where
    S: Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval(ping_interval);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else { return };
                if sink.send(text_frame(&text)).await.is_err() {
                    return;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
            () = close.cancelled() => break,
        }
    }

    while let Ok(text) = outbound.try_recv() {
        if sink.send(text_frame(&text)).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

fn text_frame(text: &Arc<String>) -> Message {
    Message::Text(String::clone(text).into())
}

/// Run a WebSocket session for a connected client.
///
/// `slot` is the reserved connection slot. It is held until teardown
/// finishes.
///
/// 1. Admits the connection (definitions are replayed into its queue)
/// 2. Forwards queued frames to the socket and pings on an interval
/// 3. Routes inbound text frames, and binary frames that are UTF-8
/// 4. Stops on close, read error, heartbeat timeout, backpressure or
///    shutdown, then tears the connection down
#[instrument(skip_all, fields(conn_id = tracing::field::Empty))]
pub async fn run_session(
    socket: WebSocket,
    manager: Arc<ConnectionManager>,
    timing: SessionTiming,
    slot: OwnedSemaphorePermit,
) {
    let (connection, outbound) = manager.accept();
    let _ = Span::current().record("conn_id", tracing::field::display(&connection.id));
    let close = connection.close_token().clone();
    let (ws_tx, mut ws_rx) = socket.split();

    let writer_close = close.clone();
    let writer_conn = Arc::clone(&connection);
    let writer = tokio::spawn(
        async move {
            forward_outbound(ws_tx, outbound, writer_close, timing.ping_interval).await;
            let _ = writer_conn.begin_close();
        }
        .instrument(Span::current()),
    );

    let monitor_conn = Arc::clone(&connection);
    let monitor = tokio::spawn(
        async move {
            let result =
                run_heartbeat(Arc::clone(&monitor_conn), timing.ping_interval, timing.pong_timeout)
                    .await;
            if let HeartbeatResult::TimedOut { silent_for } = result {
                counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                warn!(?silent_for, "client unresponsive, disconnecting");
                let _ = monitor_conn.begin_close();
            }
        }
        .instrument(Span::current()),
    );

    let dispatcher = Arc::clone(manager.dispatcher());
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = close.cancelled() => break,
        };
        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        connection.mark_alive();

        match message {
            Message::Text(text) => {
                let _ = dispatcher.handle_text(&connection, text.as_str());
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    let _ = dispatcher.handle_text(&connection, text);
                }
                Err(_) => {
                    debug!(len = data.len(), "received non-UTF8 binary frame");
                    dispatcher.reject(
                        &connection,
                        &BrokerError::validation("binary frame is not valid UTF-8"),
                    );
                }
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = manager.on_disconnect(&connection);
    monitor.abort();
    let writer_abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        writer_abort.abort();
    }
    drop(slot);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe(message: &Message) -> String {
        match message {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Close(_) => "<close>".to_owned(),
            other => format!("{other:?}"),
        }
    }

    /// Run the writer over `queued` frames. With `cancel` the close token
    /// fires while the queue is still open; without it the queue is closed.
    async fn run_writer(queued: &[&str], cancel: bool) -> Vec<String> {
        let (tx, rx) = mpsc::channel(8);
        for frame in queued {
            tx.try_send(Arc::new((*frame).to_owned())).unwrap();
        }
        let close = CancellationToken::new();
        if cancel {
            close.cancel();
        }
        let keep_open = cancel.then_some(tx);

        let (sink, stream) = futures::channel::mpsc::unbounded();
        forward_outbound(sink, rx, close, Duration::from_secs(30)).await;
        drop(keep_open);
        stream.map(|m| describe(&m)).collect().await
    }

    #[tokio::test]
    async fn queued_frames_are_flushed_before_close() {
        let frames = run_writer(&["a", "b", "c"], true).await;
        assert_eq!(frames, vec!["a", "b", "c", "<close>"]);
    }

    #[tokio::test]
    async fn close_with_empty_queue_sends_only_close() {
        let frames = run_writer(&[], true).await;
        assert_eq!(frames, vec!["<close>"]);
    }

    #[tokio::test]
    async fn closed_queue_ends_without_close_frame() {
        let frames = run_writer(&["a"], false).await;
        assert_eq!(frames, vec!["a"]);
    }
}
