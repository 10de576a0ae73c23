//! HTTP control and reporting surface.

mod handlers;

pub use handlers::*;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::engine::Engine;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Control/reporting server for the monitoring engine.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, engine: Arc<Engine>) -> Self {
        Self {
            config,
            state: AppState { engine },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Snapshots
            .route("/api/channels", get(handlers::handle_get_channels))
            .route("/api/channels/{id}", get(handlers::handle_get_channel))
            .route("/api/outages", get(handlers::handle_get_outages))
            // Control surface
            .route("/api/channels/{id}/pause", post(handlers::handle_pause))
            .route("/api/channels/{id}/resume", post(handlers::handle_resume))
            .route("/api/channels/{id}/run", post(handlers::handle_run_now))
            .route("/api/stop", post(handlers::handle_stop_all))
            .route("/api/reload", post(handlers::handle_reload))
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.routes();

        tracing::info!("control API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
