//! # rotonde
//!
//! Broker binary. Loads settings, installs logging and metrics, then serves
//! the WebSocket gateway until interrupted.

#![deny(unsafe_code)]

mod telemetry;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rotonde_core::NoticeScope;
use rotonde_server::{RotondeServer, ServerConfig};
use rotonde_settings::RotondeSettings;

/// Rotonde pub/sub broker.
#[derive(Parser, Debug)]
#[command(name = "rotonde", version, about = "Rotonde definition/event/action broker")]
struct Cli {
    /// Settings file (defaults to `~/.rotonde/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent connections (overrides settings).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Who receives `def`/`undef` notices: `all` or `subscribers`.
    #[arg(long)]
    definition_notices: Option<NoticeScope>,

    /// Log level or filter directives (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Apply flags on top of loaded settings.
    fn apply(&self, settings: &mut RotondeSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_connections {
            settings.server.max_connections = max;
        }
        if let Some(scope) = self.definition_notices {
            settings.routing.definition_notices = scope;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn server_config(settings: &RotondeSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        max_connections: server.max_connections,
        max_send_queue: server.max_send_queue,
        max_message_size: server.max_message_size,
        heartbeat_interval_secs: server.heartbeat_interval_secs,
        heartbeat_timeout_secs: server.heartbeat_timeout_secs,
        shutdown_timeout_secs: server.shutdown_timeout_secs,
        definition_notices: settings.routing.definition_notices,
    }
}

fn load(cli: &Cli) -> Result<RotondeSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(rotonde_settings::settings_path);
    let mut settings = rotonde_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid command-line override")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    telemetry::init(&settings.logging.level, settings.logging.json)?;

    let metrics = rotonde_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = server_config(&settings);
    let handle = RotondeServer::new(config)
        .with_metrics(metrics)
        .listen()
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.host))?;

    tracing::info!(
        addr = %handle.local_addr(),
        notices = %settings.routing.definition_notices,
        "rotonde listening on ws://{}",
        handle.local_addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("shutting down");

    if !handle.shutdown().await {
        tracing::warn!("shutdown timed out with sessions still running");
    }
    Ok(())
}
