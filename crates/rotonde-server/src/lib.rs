//! # rotonde-server
//!
//! Axum `WebSocket` gateway and routing for the Rotonde broker.
//!
//! - Dispatcher: applies `def`/`undef`/`sub`/`unsub` and forwards events and actions
//! - Connection management: admission, definition replay, backpressure, teardown
//! - Per-connection sessions with ping/pong heartbeat
//! - `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, RouteOutcome};
pub use server::{RotondeServer, ServerHandle};
