//! Definition registry.
//!
//! Maps identifiers to their current definition and owning connection, with
//! a reverse index so a disconnecting connection's definitions can be
//! removed without scanning the whole table.

use std::collections::{BTreeSet, HashMap};

use crate::definition::Definition;
use crate::errors::{BrokerError, Result};
use crate::ids::ConnectionId;

#[derive(Clone, Debug)]
struct Entry {
    definition: Definition,
    owner: ConnectionId,
}

/// Result of a successful [`Registry::define`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefineOutcome {
    /// First definition for this identifier.
    Created,
    /// An existing definition was overwritten.
    Replaced {
        /// Owner before the overwrite. Equal to the new owner when a
        /// connection redefines its own identifier.
        previous_owner: ConnectionId,
    },
}

/// Identifier → definition store with ownership tracking.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
    owned: HashMap<ConnectionId, BTreeSet<String>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `definition` on behalf of `owner`.
    ///
    /// Re-defining an identifier under the same kind replaces it and moves
    /// ownership to `owner`. Re-defining under a different kind fails.
    pub fn define(&mut self, owner: &ConnectionId, definition: Definition) -> Result<DefineOutcome> {
        let identifier = definition.identifier.clone();

        let outcome = match self.entries.get(&identifier) {
            Some(existing) if existing.definition.kind != definition.kind => {
                return Err(BrokerError::DuplicateKindMismatch {
                    identifier,
                    existing: existing.definition.kind,
                    requested: definition.kind,
                });
            }
            Some(existing) => DefineOutcome::Replaced {
                previous_owner: existing.owner.clone(),
            },
            None => DefineOutcome::Created,
        };

        if let DefineOutcome::Replaced { previous_owner } = &outcome {
            if previous_owner != owner {
                self.release(previous_owner, &identifier);
            }
        }

        let _ = self
            .owned
            .entry(owner.clone())
            .or_default()
            .insert(identifier.clone());
        let _ = self.entries.insert(
            identifier,
            Entry {
                definition,
                owner: owner.clone(),
            },
        );
        Ok(outcome)
    }

    /// Remove `identifier` if `requester` owns it. Returns the removed
    /// definition.
    pub fn undefine(&mut self, requester: &ConnectionId, identifier: &str) -> Result<Definition> {
        match self.entries.get(identifier) {
            None => return Err(BrokerError::not_found(identifier)),
            Some(entry) if &entry.owner != requester => {
                return Err(BrokerError::NotOwner {
                    identifier: identifier.to_owned(),
                });
            }
            Some(_) => {}
        }
        self.release(requester, identifier);
        self.entries
            .remove(identifier)
            .map(|entry| entry.definition)
            .ok_or_else(|| BrokerError::not_found(identifier))
    }

    /// Current definition for `identifier`.
    pub fn lookup(&self, identifier: &str) -> Option<&Definition> {
        self.entries.get(identifier).map(|e| &e.definition)
    }

    /// Connection that owns `identifier`.
    pub fn owner_of(&self, identifier: &str) -> Option<&ConnectionId> {
        self.entries.get(identifier).map(|e| &e.owner)
    }

    /// Identifiers owned by `connection`, sorted.
    pub fn owned_by(&self, connection: &ConnectionId) -> Vec<String> {
        self.owned
            .get(connection)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every definition owned by `connection` and return them in
    /// identifier order.
    pub fn remove_owner(&mut self, connection: &ConnectionId) -> Vec<Definition> {
        let Some(ids) = self.owned.remove(connection) else {
            return Vec::new();
        };
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| e.definition))
            .collect()
    }

    /// All definitions, in no particular order.
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.entries.values().map(|e| &e.definition)
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn release(&mut self, owner: &ConnectionId, identifier: &str) {
        if let Some(ids) = self.owned.get_mut(owner) {
            let _ = ids.remove(identifier);
            if ids.is_empty() {
                let _ = self.owned.remove(owner);
            }
        }
    }
}
