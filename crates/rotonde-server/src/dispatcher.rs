//! Envelope routing.
//!
//! The [`Dispatcher`] owns the broker state (registry and subscription
//! table) behind one `RwLock`, plus the table of live connections. Every
//! mutation takes the write lock and enqueues its notices before releasing
//! it. Event and action delivery takes the read lock. Because per-connection
//! queues are FIFO, a definition accepted before an event is always queued
//! to a recipient ahead of that event.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use rotonde_core::{
    BrokerError, ConnectionId, DataPayload, DefineOutcome, Definition, DefinitionKind, Envelope,
    NoticeScope, Registry, Result, SubscriptionTable, validate_data,
};
use tracing::{debug, error, info, warn};

use crate::metrics::{
    DEFINITIONS_ACTIVE, ENVELOPES_DELIVERED_TOTAL, ENVELOPES_RECEIVED_TOTAL, ROUTING_ERRORS_TOTAL,
    SUBSCRIPTIONS_ACTIVE,
};
use crate::websocket::connection::ClientConnection;

/// Registry and subscriptions, guarded together.
#[derive(Debug, Default)]
pub struct BrokerState {
    /// Identifier → definition and owner.
    pub registry: Registry,
    /// Connection ↔ identifier interest.
    pub subscriptions: SubscriptionTable,
}

/// What a successfully routed envelope did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A definition was stored.
    Defined {
        /// Identifier defined.
        identifier: String,
        /// Whether an earlier definition was overwritten.
        replaced: bool,
        /// Connections that received the notice.
        notified: usize,
    },
    /// A definition was removed.
    Undefined {
        /// Identifier removed.
        identifier: String,
        /// Connections that received the notice.
        notified: usize,
    },
    /// The sender subscribed.
    Subscribed {
        /// Identifier subscribed to.
        identifier: String,
        /// `false` if the subscription already existed.
        added: bool,
    },
    /// The sender unsubscribed.
    Unsubscribed {
        /// Identifier unsubscribed from.
        identifier: String,
    },
    /// An event or action was forwarded.
    Delivered {
        /// Identifier of the event or action.
        identifier: String,
        /// Connections it was queued to.
        recipients: usize,
    },
    /// The sender is not open; nothing was done.
    Ignored,
}

/// Counts removed when a connection detaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Detached {
    /// Definitions the connection owned.
    pub definitions: usize,
    /// Subscriptions the connection held.
    pub subscriptions: usize,
}

/// Routes envelopes between connections.
pub struct Dispatcher {
    state: RwLock<BrokerState>,
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    notices: NoticeScope,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new(notices: NoticeScope) -> Self {
        Self {
            state: RwLock::new(BrokerState::default()),
            connections: DashMap::new(),
            notices,
        }
    }

    /// Audience for definition notices.
    pub fn notice_scope(&self) -> NoticeScope {
        self.notices
    }

    /// Parse and route one inbound text frame.
    ///
    /// Any error is reported to `sender` as an `error` envelope before being
    /// returned. Frames from a connection that is not open are dropped
    /// unparsed.
    pub fn handle_text(&self, sender: &ClientConnection, text: &str) -> Result<RouteOutcome> {
        if !sender.is_open() {
            debug!(
                conn_id = %sender.id,
                state = %sender.state(),
                len = text.len(),
                "dropping frame from connection that is not open"
            );
            return Ok(RouteOutcome::Ignored);
        }
        let result = Envelope::parse(text).and_then(|envelope| self.route(sender, envelope));
        if let Err(err) = &result {
            self.reject(sender, err);
        }
        result
    }

    /// Report `err` to `sender` only. Nothing is sent unless `sender` is open.
    pub fn reject(&self, sender: &ClientConnection, err: &BrokerError) {
        if !sender.is_open() {
            debug!(
                conn_id = %sender.id,
                code = err.code(),
                "not reporting error to connection that is not open"
            );
            return;
        }
        counter!(ROUTING_ERRORS_TOTAL, "code" => err.code()).increment(1);
        debug!(conn_id = %sender.id, code = err.code(), error = %err, "rejecting envelope");
        let _ = sender.send_envelope(&Envelope::error(err));
    }

    /// Apply one envelope from `sender`.
    pub fn route(&self, sender: &ClientConnection, envelope: Envelope) -> Result<RouteOutcome> {
        if !sender.is_open() {
            debug!(
                conn_id = %sender.id,
                state = %sender.state(),
                envelope_type = envelope.type_name(),
                "dropping envelope from connection that is not open"
            );
            return Ok(RouteOutcome::Ignored);
        }
        counter!(ENVELOPES_RECEIVED_TOTAL, "type" => envelope.type_name()).increment(1);

        match envelope {
            Envelope::Def(definition) => self.define(sender, definition),
            Envelope::Undef(request) => self.undefine(sender, &request.identifier),
            Envelope::Sub(payload) => self.subscribe(sender, payload.identifier),
            Envelope::Unsub(payload) => self.unsubscribe(sender, &payload.identifier),
            Envelope::Event(payload) => self.publish(sender, DefinitionKind::Event, payload),
            Envelope::Action(payload) => self.publish(sender, DefinitionKind::Action, payload),
            Envelope::Error(_) => Err(BrokerError::validation(
                "error envelopes are only sent by the broker",
            )),
        }
    }

    fn define(&self, sender: &ClientConnection, definition: Definition) -> Result<RouteOutcome> {
        definition.check_shape()?;
        let identifier = definition.identifier.clone();
        let notice = encode(&Envelope::Def(definition.clone()));

        let mut state = self.state.write();
        let outcome = state.registry.define(&sender.id, definition)?;
        if let DefineOutcome::Replaced { previous_owner } = &outcome {
            if previous_owner != &sender.id {
                info!(
                    identifier,
                    from = %previous_owner,
                    to = %sender.id,
                    "definition ownership transferred"
                );
            }
        }
        let notified = notice.map_or(0, |frame| self.notify(&state, &sender.id, &identifier, &frame));
        record_gauges(&state);
        drop(state);

        let replaced = matches!(outcome, DefineOutcome::Replaced { .. });
        count_delivered("def", notified);
        info!(conn_id = %sender.id, identifier, replaced, notified, "definition registered");
        Ok(RouteOutcome::Defined {
            identifier,
            replaced,
            notified,
        })
    }

    fn undefine(&self, sender: &ClientConnection, identifier: &str) -> Result<RouteOutcome> {
        let mut state = self.state.write();
        let removed = state.registry.undefine(&sender.id, identifier)?;
        let notified = self.announce_removal(&state, &sender.id, removed);
        record_gauges(&state);
        drop(state);

        info!(conn_id = %sender.id, identifier, notified, "definition removed");
        Ok(RouteOutcome::Undefined {
            identifier: identifier.to_owned(),
            notified,
        })
    }

    fn subscribe(&self, sender: &ClientConnection, identifier: String) -> Result<RouteOutcome> {
        let mut state = self.state.write();
        let added = state.subscriptions.subscribe(&sender.id, &identifier);
        // Without broadcast notices a subscriber learns the schema here.
        if added && self.notices == NoticeScope::Subscribers {
            if let Some(definition) = state.registry.lookup(&identifier) {
                let _ = sender.send_envelope(&Envelope::Def(definition.clone()));
            }
        }
        record_gauges(&state);
        drop(state);

        debug!(conn_id = %sender.id, identifier, added, "subscribed");
        Ok(RouteOutcome::Subscribed { identifier, added })
    }

    fn unsubscribe(&self, sender: &ClientConnection, identifier: &str) -> Result<RouteOutcome> {
        let mut state = self.state.write();
        if !state.subscriptions.unsubscribe(&sender.id, identifier) {
            return Err(BrokerError::not_found(identifier));
        }
        record_gauges(&state);
        drop(state);

        debug!(conn_id = %sender.id, identifier, "unsubscribed");
        Ok(RouteOutcome::Unsubscribed {
            identifier: identifier.to_owned(),
        })
    }

    fn publish(
        &self,
        sender: &ClientConnection,
        kind: DefinitionKind,
        payload: DataPayload,
    ) -> Result<RouteOutcome> {
        let identifier = payload.identifier.clone();
        let state = self.state.read();

        let definition = state
            .registry
            .lookup(&identifier)
            .ok_or_else(|| BrokerError::not_found(&identifier))?;
        if definition.kind != kind {
            return Err(BrokerError::validation(format!(
                "{identifier} is defined as {}, not {kind}",
                definition.kind
            )));
        }
        validate_data(definition, &payload.data)?;

        let envelope = match kind {
            DefinitionKind::Event => Envelope::Event(payload),
            DefinitionKind::Action => Envelope::Action(payload),
        };
        let Some(frame) = encode(&envelope) else {
            return Ok(RouteOutcome::Delivered {
                identifier,
                recipients: 0,
            });
        };

        let mut targets: HashSet<&ConnectionId> =
            state.subscriptions.subscribers_of(&identifier).collect();
        if kind == DefinitionKind::Action {
            if let Some(owner) = state.registry.owner_of(&identifier) {
                let _ = targets.insert(owner);
            }
        }
        let recipients = self.deliver_to(targets, &sender.id, &frame);
        drop(state);

        count_delivered(envelope.type_name(), recipients);
        debug!(
            conn_id = %sender.id,
            identifier,
            envelope_type = envelope.type_name(),
            recipients,
            "forwarded"
        );
        Ok(RouteOutcome::Delivered {
            identifier,
            recipients,
        })
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Add a connection to the routing table. It receives nothing until
    /// [`attach`](Self::attach) opens it.
    pub(crate) fn register(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    /// Replay existing definitions to `connection` and open it.
    ///
    /// Holds the write lock so no definition change can slip between the
    /// replay and the connection becoming routable. Returns the number of
    /// definitions replayed.
    pub(crate) fn attach(&self, connection: &ClientConnection) -> usize {
        let state = self.state.write();
        let mut replayed = 0;
        if self.notices == NoticeScope::All {
            let mut definitions: Vec<&Definition> = state.registry.definitions().collect();
            definitions.sort_by(|a, b| a.identifier.cmp(&b.identifier));
            for definition in definitions {
                if connection.send_envelope(&Envelope::Def(definition.clone())) {
                    replayed += 1;
                }
            }
        }
        if !connection.open() {
            warn!(conn_id = %connection.id, "connection closed during definition replay");
        }
        replayed
    }

    /// Remove `connection` from the broker: undefine everything it owns,
    /// notify peers, then drop its subscriptions.
    ///
    /// Returns `None` if it was already detached.
    pub(crate) fn detach(&self, connection: &ClientConnection) -> Option<Detached> {
        let mut state = self.state.write();
        let _ = self.connections.remove(&connection.id)?;

        let removed = state.registry.remove_owner(&connection.id);
        let definitions = removed.len();
        for definition in removed {
            let _ = self.announce_removal(&state, &connection.id, definition);
        }
        let subscriptions = state.subscriptions.remove_connection(&connection.id);
        record_gauges(&state);

        Some(Detached {
            definitions,
            subscriptions,
        })
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Live connection by id.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of definitions.
    pub fn definition_count(&self) -> usize {
        self.state.read().registry.len()
    }

    /// Number of subscription pairs.
    pub fn subscription_count(&self) -> usize {
        self.state.read().subscriptions.len()
    }

    /// Copy of the current definition for `identifier`.
    pub fn lookup(&self, identifier: &str) -> Option<Definition> {
        self.state.read().registry.lookup(identifier).cloned()
    }

    /// Owner of `identifier`.
    pub fn owner_of(&self, identifier: &str) -> Option<ConnectionId> {
        self.state.read().registry.owner_of(identifier).cloned()
    }

    /// Subscribers of `identifier`, sorted.
    pub fn subscribers_of(&self, identifier: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .state
            .read()
            .subscriptions
            .subscribers_of(identifier)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    // ── Delivery ────────────────────────────────────────────────────

    fn announce_removal(
        &self,
        state: &BrokerState,
        origin: &ConnectionId,
        definition: Definition,
    ) -> usize {
        let identifier = definition.identifier.clone();
        let notified = encode(&Envelope::Undef(definition.into()))
            .map_or(0, |frame| self.notify(state, origin, &identifier, &frame));
        count_delivered("undef", notified);
        notified
    }

    fn notify(
        &self,
        state: &BrokerState,
        origin: &ConnectionId,
        identifier: &str,
        frame: &Arc<String>,
    ) -> usize {
        match self.notices {
            NoticeScope::All => self
                .connections
                .iter()
                .filter(|entry| entry.key() != origin)
                .filter(|entry| {
                    let connection = entry.value();
                    connection.is_open() && connection.send(Arc::clone(frame))
                })
                .count(),
            NoticeScope::Subscribers => {
                self.deliver_to(state.subscriptions.subscribers_of(identifier), origin, frame)
            }
        }
    }

    fn deliver_to<'a>(
        &self,
        targets: impl IntoIterator<Item = &'a ConnectionId>,
        origin: &ConnectionId,
        frame: &Arc<String>,
    ) -> usize {
        targets
            .into_iter()
            .filter(|id| *id != origin)
            .filter(|id| {
                self.connections.get(*id).is_some_and(|entry| {
                    let connection = entry.value();
                    connection.is_open() && connection.send(Arc::clone(frame))
                })
            })
            .count()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(NoticeScope::default())
    }
}

fn encode(envelope: &Envelope) -> Option<Arc<String>> {
    match envelope.to_json() {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            error!(envelope_type = envelope.type_name(), error = %e, "failed to encode envelope");
            None
        }
    }
}

fn count_delivered(kind: &'static str, n: usize) {
    if n > 0 {
        counter!(ENVELOPES_DELIVERED_TOTAL, "type" => kind).increment(n as u64);
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_gauges(state: &BrokerState) {
    gauge!(DEFINITIONS_ACTIVE).set(state.registry.len() as f64);
    gauge!(SUBSCRIPTIONS_ACTIVE).set(state.subscriptions.len() as f64);
}
