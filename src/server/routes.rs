//! HTTP routes definition

use axum::{
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};

use super::handlers;

/// Parking lot routes
///
/// - POST /api/parking-lots                          - Create a lot
/// - POST /api/parking-lots/:id/initialize           - Create or clear lot `id`
/// - PUT  /api/parking-lots/:id/reinitialize         - Re-lay an existing lot
/// - POST /api/parking-lots/:id/park                 - Park a vehicle
/// - POST /api/parking-lots/:id/unpark               - Free a space
/// - GET  /api/parking-lots/:id/status               - Counters and spaces
/// - POST /api/parking-lots/:id/sync-capacity-cache  - Recompute counters
pub fn lot_routes() -> Router {
    Router::new()
        .route("/api/parking-lots", post(handlers::create_lot))
        .route("/api/parking-lots/:id/initialize", post(handlers::initialize_lot))
        .route("/api/parking-lots/:id/reinitialize", put(handlers::reinitialize_lot))
        .route("/api/parking-lots/:id/park", post(handlers::park))
        .route("/api/parking-lots/:id/unpark", post(handlers::unpark))
        .route("/api/parking-lots/:id/status", get(handlers::status))
        .route(
            "/api/parking-lots/:id/sync-capacity-cache",
            post(handlers::sync_capacity_cache),
        )
}

/// Health and metrics routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/_metrics", get(metrics_endpoint))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint() -> String {
    crate::metrics::export_metrics()
}
