//! `/health` endpoint.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// RFC 3339 start time.
    pub started_at: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
    /// Registered definitions.
    pub definitions: usize,
    /// Subscription pairs.
    pub subscriptions: usize,
}

/// Live counters reported by `/health`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerCounts {
    /// Live WebSocket connections.
    pub connections: usize,
    /// Registered definitions.
    pub definitions: usize,
    /// Subscription pairs.
    pub subscriptions: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    counts: BrokerCounts,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counts.connections,
        definitions: counts.definitions,
        subscriptions: counts.subscriptions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), Utc::now(), BrokerCounts::default());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_reflects_start() {
        let start = Instant::now()
            .checked_sub(Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, Utc::now(), BrokerCounts::default());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let counts = BrokerCounts {
            connections: 3,
            definitions: 2,
            subscriptions: 5,
        };
        let started = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let resp = health_check(Instant::now(), started, counts);
        let parsed: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["started_at"], "2024-05-01T12:00:00Z");
        assert_eq!(parsed["connections"], 3);
        assert_eq!(parsed["definitions"], 2);
        assert_eq!(parsed["subscriptions"], 5);
        assert!(parsed["uptime_secs"].is_number());
    }
}
