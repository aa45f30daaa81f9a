//! Broker error taxonomy.
//!
//! Every variant is connection-local: it is reported back to the connection
//! that caused it and never reaches other peers.

use crate::definition::DefinitionKind;

/// Malformed envelope, unknown type or schema mismatch.
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
/// Identifier re-defined under a different kind.
pub const DUPLICATE_KIND_MISMATCH: &str = "DUPLICATE_KIND_MISMATCH";
/// Unknown identifier.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Undefine attempted by a connection that does not own the definition.
pub const NOT_OWNER: &str = "NOT_OWNER";

/// Errors produced while routing an envelope.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Envelope or payload failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The identifier already exists with another kind.
    #[error("{identifier} is already defined as {existing}, cannot redefine as {requested}")]
    DuplicateKindMismatch {
        /// Offending identifier.
        identifier: String,
        /// Kind currently registered.
        existing: DefinitionKind,
        /// Kind the client asked for.
        requested: DefinitionKind,
    },

    /// No definition or subscription for the identifier.
    #[error("{identifier} not found")]
    NotFound {
        /// Unknown identifier.
        identifier: String,
    },

    /// Only the owner may undefine.
    #[error("{identifier} is owned by another connection")]
    NotOwner {
        /// Identifier the sender does not own.
        identifier: String,
    },
}

impl BrokerError {
    /// Shorthand for [`BrokerError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for [`BrokerError::NotFound`].
    pub fn not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
        }
    }

    /// Machine-readable code carried in error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => VALIDATION_ERROR,
            Self::DuplicateKindMismatch { .. } => DUPLICATE_KIND_MISMATCH,
            Self::NotFound { .. } => NOT_FOUND,
            Self::NotOwner { .. } => NOT_OWNER,
        }
    }

    /// Identifier the error refers to, when there is one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Validation(_) => None,
            Self::DuplicateKindMismatch { identifier, .. }
            | Self::NotFound { identifier }
            | Self::NotOwner { identifier } => Some(identifier),
        }
    }

    /// Whether the request itself was malformed, as opposed to conflicting
    /// with broker state.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Result alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
