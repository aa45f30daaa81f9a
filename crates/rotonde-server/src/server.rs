//! `RotondeServer`: axum HTTP + WebSocket gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::health::{self, BrokerCounts, HealthResponse};
use crate::metrics::CONNECTIONS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::manager::ConnectionManager;
use crate::websocket::session::{SessionTiming, run_session};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection admission and teardown.
    pub manager: Arc<ConnectionManager>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started (monotonic).
    pub start_time: Instant,
    /// When the server started (wall clock).
    pub started_at: DateTime<Utc>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Rotonde broker server.
pub struct RotondeServer {
    state: AppState,
}

impl RotondeServer {
    /// Create a server. Nothing is bound until [`listen`](Self::listen).
    pub fn new(config: ServerConfig) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let dispatcher = Arc::new(Dispatcher::new(config.definition_notices));
        let manager = Arc::new(ConnectionManager::new(dispatcher, &config, shutdown.token()));
        Self {
            state: AppState {
                manager,
                shutdown,
                config: Arc::new(config),
                start_time: Instant::now(),
                started_at: Utc::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Shared dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.state.manager.dispatcher()
    }

    /// Connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.state.manager
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Bind the listener and start serving in the background.
    pub async fn listen(self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });

        info!(
            addr = %local_addr,
            notices = %self.state.config.definition_notices,
            "rotonde broker listening"
        );
        Ok(ServerHandle {
            local_addr,
            state: self.state,
            server,
        })
    }
}

/// Handle returned by [`RotondeServer::listen`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: AppState,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Shared dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.state.manager.dispatcher()
    }

    /// Stop accepting, close every session and wait for teardown.
    ///
    /// Returns `false` if sessions were still running at the timeout.
    pub async fn shutdown(self) -> bool {
        let timeout = self.state.config.shutdown_timeout();
        self.state
            .shutdown
            .graceful_shutdown(vec![self.server], timeout)
            .await
    }
}

/// GET / and GET /ws: upgrade to a broker session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let Some(slot) = state.manager.reserve() else {
        counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(
            max_connections = state.config.max_connections,
            "connection limit reached, rejecting upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let timing = SessionTiming {
        ping_interval: state.config.heartbeat_interval(),
        pong_timeout: state.config.heartbeat_timeout(),
    };
    let sessions = state.shutdown.sessions().clone();
    let manager = state.manager;
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            sessions.track_future(run_session(socket, manager, timing, slot))
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let dispatcher = state.manager.dispatcher();
    let counts = BrokerCounts {
        connections: dispatcher.connection_count(),
        definitions: dispatcher.definition_count(),
        subscriptions: dispatcher.subscription_count(),
    };
    Json(health::health_check(state.start_time, state.started_at, counts))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> RotondeServer {
        RotondeServer::new(ServerConfig::default())
    }

    async fn get(app: Router, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_counts() {
        let server = make_server();
        let resp = get(server.router(), "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["definitions"], 0);
        assert_eq!(parsed["subscriptions"], 0);
        assert!(parsed["started_at"].is_string());
    }

    #[tokio::test]
    async fn ws_routes_require_upgrade() {
        let server = make_server();
        for uri in ["/", "/ws"] {
            let resp = get(server.router(), uri).await;
            assert!(resp.status().is_client_error(), "{uri}: {}", resp.status());
        }
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server();
        let resp = get(server.router(), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_renders_text() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let resp = get(server.router(), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let resp = get(server.router(), "/nonexistent").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_shuts_down() {
        let handle = make_server().listen().await.unwrap();
        assert_ne!(handle.port(), 0);
        assert!(handle.shutdown().await);
    }

    #[test]
    fn accessors() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.manager().count(), 0);
        assert_eq!(server.dispatcher().definition_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }
}
