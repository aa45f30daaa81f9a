//! Event and action definitions.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, Result};

/// Whether a definition describes an event or an action.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    /// Emitted by its owner, delivered to subscribers.
    Event,
    /// Sent by anyone, handled by the owner.
    Action,
}

impl DefinitionKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared runtime type of a field.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// JSON string.
    String,
    /// Any JSON number.
    Number,
    /// JSON `true` / `false`.
    Boolean,
}

impl FieldType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named, typed field of a definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name, unique within its definition.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Optional unit label (e.g. `"m/s"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl FieldDefinition {
    /// Field without a unit label.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            units: None,
        }
    }

    /// Attach a unit label.
    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }
}

/// A named schema for an event or an action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Unique identifier (e.g. `"PING"`).
    pub identifier: String,
    /// Event or action.
    #[serde(rename = "type")]
    pub kind: DefinitionKind,
    /// Ordered field list.
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl Definition {
    /// Definition with no fields.
    pub fn new(identifier: impl Into<String>, kind: DefinitionKind) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            fields: Vec::new(),
        }
    }

    /// Append a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check structural invariants: non-empty identifier, non-empty and
    /// unique field names.
    pub fn check_shape(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(BrokerError::validation("definition identifier must not be empty"));
        }
        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(BrokerError::validation(format!(
                    "definition {} has a field with an empty name",
                    self.identifier
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(BrokerError::validation(format!(
                    "definition {} declares field {} more than once",
                    self.identifier, field.name
                )));
            }
        }
        Ok(())
    }
}
