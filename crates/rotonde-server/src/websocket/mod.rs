//! WebSocket connection management, heartbeat and per-client sessions.

pub mod connection;
pub mod heartbeat;
pub mod manager;
pub mod session;
