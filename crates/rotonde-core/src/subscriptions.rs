//! Subscription table.

use std::collections::{HashMap, HashSet};

use crate::ids::ConnectionId;

/// Which connections are interested in which identifiers.
///
/// Keeps a forward index (identifier → connections) for routing and a
/// reverse index (connection → identifiers) for teardown. Empty sets are
/// pruned from both.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    by_identifier: HashMap<String, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, HashSet<String>>,
}

impl SubscriptionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add interest. Returns `false` if it was already there.
    pub fn subscribe(&mut self, connection: &ConnectionId, identifier: &str) -> bool {
        let added = self
            .by_identifier
            .entry(identifier.to_owned())
            .or_default()
            .insert(connection.clone());
        if added {
            let _ = self
                .by_connection
                .entry(connection.clone())
                .or_default()
                .insert(identifier.to_owned());
        }
        added
    }

    /// Remove interest. Returns `false` if there was none.
    pub fn unsubscribe(&mut self, connection: &ConnectionId, identifier: &str) -> bool {
        let removed = match self.by_identifier.get_mut(identifier) {
            Some(conns) => {
                let removed = conns.remove(connection);
                if conns.is_empty() {
                    let _ = self.by_identifier.remove(identifier);
                }
                removed
            }
            None => false,
        };
        if removed {
            if let Some(ids) = self.by_connection.get_mut(connection) {
                let _ = ids.remove(identifier);
                if ids.is_empty() {
                    let _ = self.by_connection.remove(connection);
                }
            }
        }
        removed
    }

    /// Connections subscribed to `identifier`.
    pub fn subscribers_of(&self, identifier: &str) -> impl Iterator<Item = &ConnectionId> {
        self.by_identifier
            .get(identifier)
            .into_iter()
            .flat_map(HashSet::iter)
    }

    /// Whether `connection` is subscribed to `identifier`.
    pub fn is_subscribed(&self, connection: &ConnectionId, identifier: &str) -> bool {
        self.by_identifier
            .get(identifier)
            .is_some_and(|conns| conns.contains(connection))
    }

    /// Identifiers `connection` is subscribed to, sorted.
    pub fn subscriptions_of(&self, connection: &ConnectionId) -> Vec<String> {
        let mut ids: Vec<String> = self
            .by_connection
            .get(connection)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Drop every subscription held by `connection`. Returns how many were
    /// removed.
    pub fn remove_connection(&mut self, connection: &ConnectionId) -> usize {
        let Some(ids) = self.by_connection.remove(connection) else {
            return 0;
        };
        for id in &ids {
            if let Some(conns) = self.by_identifier.get_mut(id) {
                let _ = conns.remove(connection);
                if conns.is_empty() {
                    let _ = self.by_identifier.remove(id);
                }
            }
        }
        ids.len()
    }

    /// Total number of (connection, identifier) pairs.
    pub fn len(&self) -> usize {
        self.by_connection.values().map(HashSet::len).sum()
    }

    /// Whether no subscriptions exist.
    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(name: &str) -> ConnectionId {
        ConnectionId::from_raw(name)
    }

    fn sorted(table: &SubscriptionTable, identifier: &str) -> Vec<String> {
        let mut out: Vec<String> = table
            .subscribers_of(identifier)
            .map(ToString::to_string)
            .collect();
        out.sort();
        out
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut table = SubscriptionTable::new();
        assert!(table.subscribe(&conn("a"), "GPS"));
        assert!(!table.subscribe(&conn("a"), "GPS"));
        assert_eq!(sorted(&table, "GPS"), vec!["a"]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn multiple_subscribers() {
        let mut table = SubscriptionTable::new();
        let _ = table.subscribe(&conn("a"), "GPS");
        let _ = table.subscribe(&conn("b"), "GPS");
        let _ = table.subscribe(&conn("b"), "TEMP");
        assert_eq!(sorted(&table, "GPS"), vec!["a", "b"]);
        assert_eq!(sorted(&table, "TEMP"), vec!["b"]);
        assert_eq!(table.subscriptions_of(&conn("b")), vec!["GPS", "TEMP"]);
    }

    #[test]
    fn unsubscribe_removes_interest() {
        let mut table = SubscriptionTable::new();
        let _ = table.subscribe(&conn("a"), "GPS");
        assert!(table.unsubscribe(&conn("a"), "GPS"));
        assert!(!table.unsubscribe(&conn("a"), "GPS"));
        assert_eq!(table.subscribers_of("GPS").count(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn unsubscribe_unknown_is_false() {
        let mut table = SubscriptionTable::new();
        assert!(!table.unsubscribe(&conn("a"), "NOPE"));
        let _ = table.subscribe(&conn("b"), "GPS");
        assert!(!table.unsubscribe(&conn("a"), "GPS"));
        assert!(table.is_subscribed(&conn("b"), "GPS"));
    }

    #[test]
    fn remove_connection_clears_both_indexes() {
        let mut table = SubscriptionTable::new();
        let _ = table.subscribe(&conn("a"), "GPS");
        let _ = table.subscribe(&conn("a"), "TEMP");
        let _ = table.subscribe(&conn("b"), "GPS");

        assert_eq!(table.remove_connection(&conn("a")), 2);
        assert_eq!(sorted(&table, "GPS"), vec!["b"]);
        assert_eq!(table.subscribers_of("TEMP").count(), 0);
        assert!(table.subscriptions_of(&conn("a")).is_empty());
        assert_eq!(table.remove_connection(&conn("a")), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn subscribers_of_unknown_is_empty() {
        let table = SubscriptionTable::new();
        assert_eq!(table.subscribers_of("X").count(), 0);
        assert!(!table.is_subscribed(&conn("a"), "X"));
    }
}
