//! # rotonde-core
//!
//! Data model and routing state for the Rotonde broker.
//!
//! This crate is synchronous and knows nothing about sockets:
//!
//! - **IDs**: [`ConnectionId`] branded newtype
//! - **Definitions**: [`Definition`] schemas for events and actions
//! - **Envelopes**: [`Envelope`] wire messages (`def`, `undef`, `sub`, `unsub`, `event`, `action`, `error`)
//! - **Validation**: [`validate_data`] checks payloads against their definition
//! - **Registry**: [`Registry`] maps identifiers to definitions and owners
//! - **Subscriptions**: [`SubscriptionTable`] tracks interest per connection
//! - **Errors**: [`BrokerError`] with stable wire codes

#![deny(unsafe_code)]

pub mod definition;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod notice;
pub mod registry;
pub mod subscriptions;
pub mod validation;

pub use definition::{Definition, DefinitionKind, FieldDefinition, FieldType};
pub use envelope::{DataPayload, Envelope, ErrorPayload, IdentifierPayload, Undefinition};
pub use errors::{BrokerError, Result};
pub use ids::ConnectionId;
pub use notice::{NoticeScope, ParseNoticeScopeError};
pub use registry::{DefineOutcome, Registry};
pub use subscriptions::SubscriptionTable;
pub use validation::validate_data;
