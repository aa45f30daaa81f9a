//! Server configuration.

use std::time::Duration;

use rotonde_core::NoticeScope;
use serde::{Deserialize, Serialize};

/// Runtime configuration for [`RotondeServer`](crate::server::RotondeServer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound frames buffered per connection.
    pub max_send_queue: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close after this many seconds without a pong.
    pub heartbeat_timeout_secs: u64,
    /// Grace period for sessions on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Audience for definition notices.
    pub definition_notices: NoticeScope,
}

impl ServerConfig {
    /// `"host:port"` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            max_send_queue: 256,
            max_message_size: 1024 * 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            shutdown_timeout_secs: 10,
            definition_notices: NoticeScope::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_send_queue, 256);
        assert_eq!(cfg.definition_notices, NoticeScope::All);
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn bind_addr_formats() {
        let cfg = ServerConfig {
            host: "0.0.0.0".into(),
            port: 4224,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "0.0.0.0:4224");
    }

    #[test]
    fn deserialize_from_json() {
        let json = r#"{"host":"10.0.0.1","port":3000,"max_connections":5,"max_send_queue":8,"max_message_size":512,"heartbeat_interval_secs":10,"heartbeat_timeout_secs":30,"shutdown_timeout_secs":1,"definition_notices":"subscribers"}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_send_queue, 8);
        assert_eq!(cfg.definition_notices, NoticeScope::Subscribers);
    }
}
