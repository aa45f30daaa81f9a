//! Wire envelope: `{"type": ..., "payload": {...}}`.
//!
//! Serialization uses serde's adjacent tagging. Parsing goes through
//! [`Envelope::parse`], which turns every malformed input into a
//! [`BrokerError::Validation`] with a message a client can act on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::definition::{Definition, DefinitionKind, FieldDefinition};
use crate::errors::{BrokerError, Result};

/// Payload carrying only an identifier (`sub`, `unsub`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierPayload {
    /// Target identifier.
    pub identifier: String,
}

impl IdentifierPayload {
    /// Build from an identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

/// `undef` payload.
///
/// Clients only need to send the identifier. Notices sent by the broker
/// carry the full removed definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Undefinition {
    /// Identifier being removed.
    pub identifier: String,
    /// Kind of the removed definition.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DefinitionKind>,
    /// Fields of the removed definition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDefinition>,
}

impl Undefinition {
    /// Request form: identifier only.
    pub fn request(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: None,
            fields: Vec::new(),
        }
    }
}

impl From<Definition> for Undefinition {
    fn from(def: Definition) -> Self {
        Self {
            identifier: def.identifier,
            kind: Some(def.kind),
            fields: def.fields,
        }
    }
}

/// `event` / `action` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPayload {
    /// Definition this data conforms to.
    pub identifier: String,
    /// Field values keyed by field name.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl DataPayload {
    /// Build from an identifier and a JSON object. Non-object values yield
    /// empty data.
    pub fn new(identifier: impl Into<String>, data: Value) -> Self {
        Self {
            identifier: identifier.into(),
            data: match data {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

/// Outbound-only error report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Identifier involved, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl From<&BrokerError> for ErrorPayload {
    fn from(err: &BrokerError) -> Self {
        Self {
            code: err.code().to_owned(),
            message: err.to_string(),
            identifier: err.identifier().map(str::to_owned),
        }
    }
}

/// A message exchanged between the broker and a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Envelope {
    /// Publish or replace a definition.
    Def(Definition),
    /// Remove a definition.
    Undef(Undefinition),
    /// Subscribe the sender to an identifier.
    Sub(IdentifierPayload),
    /// Unsubscribe the sender from an identifier.
    Unsub(IdentifierPayload),
    /// Event data.
    Event(DataPayload),
    /// Action data.
    Action(DataPayload),
    /// Error report, broker to client only.
    Error(ErrorPayload),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| BrokerError::validation(format!("invalid {kind} payload: {e}")))
}

impl Envelope {
    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text)
            .map_err(|e| BrokerError::validation(format!("invalid envelope: {e}")))?;

        let envelope = match raw.kind.as_str() {
            "def" => Self::Def(payload("def", raw.payload)?),
            "undef" => Self::Undef(payload("undef", raw.payload)?),
            "sub" => Self::Sub(payload("sub", raw.payload)?),
            "unsub" => Self::Unsub(payload("unsub", raw.payload)?),
            "event" => Self::Event(payload("event", raw.payload)?),
            "action" => Self::Action(payload("action", raw.payload)?),
            other => {
                return Err(BrokerError::validation(format!(
                    "unknown envelope type {other:?}"
                )));
            }
        };
        Ok(envelope)
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Wire `type` of this envelope.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Def(_) => "def",
            Self::Undef(_) => "undef",
            Self::Sub(_) => "sub",
            Self::Unsub(_) => "unsub",
            Self::Event(_) => "event",
            Self::Action(_) => "action",
            Self::Error(_) => "error",
        }
    }

    /// Identifier the envelope is about, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Def(d) => Some(&d.identifier),
            Self::Undef(u) => Some(&u.identifier),
            Self::Sub(p) | Self::Unsub(p) => Some(&p.identifier),
            Self::Event(p) | Self::Action(p) => Some(&p.identifier),
            Self::Error(e) => e.identifier.as_deref(),
        }
    }

    /// Error envelope for `err`.
    pub fn error(err: &BrokerError) -> Self {
        Self::Error(err.into())
    }
}
