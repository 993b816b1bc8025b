//! HTTP server
//!
//! Thin axum adapter over the allocation engine. Handlers validate input,
//! call one engine operation and map its error kind to a status code.

pub mod handlers;
pub mod middleware;
pub mod routes;

use axum::{extract::Extension, middleware::from_fn, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::ServerSettings;
use crate::engine::ParkingEngine;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: String,
    /// HTTP port
    pub http_port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerSettings::default().into()
    }
}

impl From<ServerSettings> for ServerConfig {
    fn from(settings: ServerSettings) -> Self {
        Self {
            http_addr: settings.bind,
            http_port: settings.port,
            enable_cors: settings.cors,
            timeout_secs: settings.timeout_secs,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub engine: Arc<ParkingEngine>,
    pub config: ServerConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish()
    }
}

/// Build the full router over `state`.
pub fn app(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.timeout_secs.max(1));
    let enable_cors = state.config.enable_cors;

    let app = Router::new()
        .merge(routes::lot_routes())
        .merge(routes::health_routes())
        .layer(Extension(state))
        .layer(from_fn(middleware::log_request))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Start the parkd HTTP server
pub async fn start_server(config: ServerConfig, engine: Arc<ParkingEngine>) -> anyhow::Result<()> {
    info!(
        addr = %config.http_addr,
        port = config.http_port,
        "Starting parkd HTTP server"
    );

    crate::metrics::init_metrics();

    let lots = engine.warm_cache().await?;
    info!(lots, "Startup complete");

    let addr = format!("{}:{}", config.http_addr, config.http_port);
    let state = Arc::new(AppState { engine, config });
    let app = app(state);

    let listener = TcpListener::bind(&addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Metrics: http://{}/_metrics", addr);
    info!("Health: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            anyhow::anyhow!("Server failed: {}", e)
        })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
