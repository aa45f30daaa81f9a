//! Connection lifecycle: admission, definition replay and teardown.

use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use rotonde_core::{ConnectionId, Envelope};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::connection::{ClientConnection, ConnectionState};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
};

/// Admits and tears down connections around a shared [`Dispatcher`].
pub struct ConnectionManager {
    dispatcher: Arc<Dispatcher>,
    slots: Arc<Semaphore>,
    max_send_queue: usize,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager. Each connection's close token is a child of
    /// `shutdown`.
    pub fn new(dispatcher: Arc<Dispatcher>, config: &ServerConfig, shutdown: CancellationToken) -> Self {
        Self {
            dispatcher,
            slots: Arc::new(Semaphore::new(
                config.max_connections.min(Semaphore::MAX_PERMITS),
            )),
            max_send_queue: config.max_send_queue.max(1),
            shutdown,
        }
    }

    /// Shared dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Whether a connection slot is free right now.
    pub fn has_capacity(&self) -> bool {
        self.slots.available_permits() > 0
    }

    /// Claim one of the `max_connections` slots, or `None` when all are
    /// taken. The slot is released when the permit is dropped.
    pub fn reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).try_acquire_owned().ok()
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.dispatcher.connection_count()
    }

    /// Register a new connection, replay existing definitions into its
    /// queue and open it.
    ///
    /// The returned receiver is the connection's outbound queue.
    pub fn accept(&self) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(ClientConnection::new(
            ConnectionId::new(),
            tx,
            self.shutdown.child_token(),
        ));

        self.dispatcher.register(Arc::clone(&connection));
        let replayed = self.dispatcher.attach(&connection);

        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        info!(conn_id = %connection.id, replayed, "client connected");
        (connection, rx)
    }

    /// Send one envelope to a connection by id.
    pub fn send(&self, id: &ConnectionId, envelope: &Envelope) -> bool {
        self.dispatcher
            .connection(id)
            .is_some_and(|connection| connection.is_open() && connection.send_envelope(envelope))
    }

    /// Tear a connection down.
    ///
    /// Its definitions are undefined (peers get `undef` notices) and its
    /// subscriptions are dropped. Safe to call more than once; returns
    /// `true` only for the call that did the work.
    pub fn on_disconnect(&self, connection: &ClientConnection) -> bool {
        if connection.state() == ConnectionState::Closed {
            return false;
        }
        let _ = connection.begin_close();
        let Some(detached) = self.dispatcher.detach(connection) else {
            connection.mark_closed();
            return false;
        };
        connection.mark_closed();

        counter!(DISCONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
        info!(
            conn_id = %connection.id,
            definitions = detached.definitions,
            subscriptions = detached.subscriptions,
            dropped = connection.drop_count(),
            "client disconnected"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotonde_core::{BrokerError, NoticeScope};
    use serde_json::{Value, json};

    fn manager_with(config: &ServerConfig) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(Dispatcher::new(config.definition_notices)),
            config,
            CancellationToken::new(),
        )
    }

    fn manager() -> ConnectionManager {
        manager_with(&ServerConfig::default())
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[test]
    fn accept_opens_connection() {
        let m = manager();
        let (conn, _rx) = m.accept();
        assert!(conn.is_open());
        assert!(conn.id.as_str().starts_with("conn_"));
        assert_eq!(m.count(), 1);
    }

    #[test]
    fn capacity_limit() {
        let config = ServerConfig {
            max_connections: 2,
            ..ServerConfig::default()
        };
        let m = manager_with(&config);
        let first = m.reserve().unwrap();
        assert!(m.has_capacity());
        let _second = m.reserve().unwrap();
        assert!(!m.has_capacity());
        assert!(m.reserve().is_none());

        drop(first);
        assert!(m.has_capacity());
        assert!(m.reserve().is_some());
    }

    #[tokio::test]
    async fn concurrent_reservations_never_exceed_limit() {
        let config = ServerConfig {
            max_connections: 4,
            ..ServerConfig::default()
        };
        let m = Arc::new(manager_with(&config));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let m = Arc::clone(&m);
                tokio::spawn(async move { m.reserve() })
            })
            .collect();
        let permits: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter_map(|joined| joined.unwrap())
            .collect();
        assert_eq!(permits.len(), 4);
        assert!(!m.has_capacity());
    }

    #[test]
    fn send_by_id() {
        let m = manager();
        let (conn, mut rx) = m.accept();
        assert!(m.send(&conn.id, &Envelope::error(&BrokerError::validation("x"))));
        assert_eq!(drain(&mut rx)[0]["type"], "error");
        assert!(!m.send(&ConnectionId::from_raw("conn_missing"), &Envelope::error(&BrokerError::validation("x"))));
    }

    #[test]
    fn disconnect_undefines_owned_and_notifies() {
        let m = manager();
        let d = Arc::clone(m.dispatcher());
        let (owner, _ro) = m.accept();
        let (peer, mut rp) = m.accept();

        let def = json!({"type": "def", "payload": {"identifier": "GPS", "type": "event", "fields": []}});
        let _ = d.handle_text(&owner, &def.to_string()).unwrap();
        let _ = d
            .handle_text(&owner, r#"{"type":"sub","payload":{"identifier":"TEMP"}}"#)
            .unwrap();
        let _ = drain(&mut rp);

        assert!(m.on_disconnect(&owner));
        assert_eq!(owner.state(), ConnectionState::Closed);
        assert!(owner.close_token().is_cancelled());
        assert!(d.lookup("GPS").is_none());
        assert_eq!(d.subscription_count(), 0);
        assert_eq!(m.count(), 1);

        let frames = drain(&mut rp);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "undef");
        assert_eq!(frames[0]["payload"]["identifier"], "GPS");
        assert!(peer.is_open());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let m = manager();
        let (conn, _rx) = m.accept();
        assert!(m.on_disconnect(&conn));
        assert!(!m.on_disconnect(&conn));
        assert_eq!(m.count(), 0);
    }

    #[test]
    fn slow_connection_is_closed_without_stalling_others() {
        let config = ServerConfig {
            max_send_queue: 1,
            ..ServerConfig::default()
        };
        let m = manager_with(&config);
        let d = Arc::clone(m.dispatcher());
        let (producer, _rp) = m.accept();
        let (slow, _rs) = m.accept();
        let (fast, mut rf) = m.accept();

        for id in ["A", "B", "C"] {
            let def = json!({"type": "def", "payload": {"identifier": id, "type": "event"}});
            let _ = d.handle_text(&producer, &def.to_string()).unwrap();
            let _ = drain(&mut rf);
        }

        assert_eq!(slow.state(), ConnectionState::Closing);
        assert!(slow.close_token().is_cancelled());
        assert!(fast.is_open());
        assert!(m.on_disconnect(&slow));
    }

    #[test]
    fn shutdown_token_cancels_connections() {
        let root = CancellationToken::new();
        let m = ConnectionManager::new(
            Arc::new(Dispatcher::new(NoticeScope::All)),
            &ServerConfig::default(),
            root.clone(),
        );
        let (conn, _rx) = m.accept();
        root.cancel();
        assert!(conn.close_token().is_cancelled());
    }
}
