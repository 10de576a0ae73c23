//! channelwatch - channel monitoring and outage tracking daemon.
//!
//! Probes a configured set of channels on independent schedules, tracks
//! health-state transitions, and records outages with both detection and
//! true-impact timing.

mod bus;
mod config;
mod engine;
mod guard;
mod model;
mod probe;
mod storage;
mod web;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{MonitorPolicy, ServerConfig};
use engine::{AlwaysOwner, Engine};
use guard::AllowAll;
use probe::NetworkGateway;
use storage::SqliteStore;
use web::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("channelwatch=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("starting channelwatch on port {}...", cfg.http_port);
    tracing::info!("using database at {}", cfg.db_path);

    // Initialize storage
    let store = Arc::new(SqliteStore::new(&cfg.db_path)?);
    tracing::info!("database initialized successfully");

    // Load the channel set
    let channels = match config::load_channels(&cfg.channels_path) {
        Ok(channels) => {
            tracing::info!("loaded {} channels from {}", channels.len(), cfg.channels_path);
            channels
        }
        Err(e) => {
            tracing::warn!("no channels loaded ({}); starting idle", e);
            Vec::new()
        }
    };

    // Assemble and start the engine
    let engine = Arc::new(Engine::new(
        Arc::new(NetworkGateway),
        Arc::new(AllowAll),
        store,
        Arc::new(AlwaysOwner),
        MonitorPolicy::default(),
    ));
    engine.start(channels).await;

    // Start the control API
    let server = Server::new(cfg, engine);
    server.start().await?;

    Ok(())
}
