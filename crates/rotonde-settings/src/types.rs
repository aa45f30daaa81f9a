//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`
//! so a settings file only needs the keys it changes.

use rotonde_core::NoticeScope;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the broker.
///
/// ```json
/// {
///   "server": { "port": 4224, "maxConnections": 512 },
///   "routing": { "definitionNotices": "all" },
///   "logging": { "level": "info", "json": false }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RotondeSettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Routing behavior.
    pub routing: RoutingSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RotondeSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("host must not be empty".into()));
        }
        if s.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "maxConnections must be at least 1".into(),
            ));
        }
        if s.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "maxSendQueue must be at least 1".into(),
            ));
        }
        if s.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        if s.heartbeat_timeout_secs <= s.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeatTimeoutSecs ({}) must exceed heartbeatIntervalSecs ({})",
                s.heartbeat_timeout_secs, s.heartbeat_interval_secs
            )));
        }
        Ok(())
    }
}

/// Listener and per-connection limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    /// Upgrades beyond this many live connections get HTTP 503.
    pub max_connections: usize,
    /// Outbound frames buffered per connection before it is dropped.
    pub max_send_queue: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a connection is closed.
    pub heartbeat_timeout_secs: u64,
    /// Seconds to wait for sessions to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4224,
            max_connections: 1024,
            max_send_queue: 256,
            max_message_size: 1024 * 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Routing behavior.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingSettings {
    /// Audience for `def` / `undef` notices.
    pub definition_notices: NoticeScope,
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `info` or `rotonde_server=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
