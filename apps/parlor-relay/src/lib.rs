//! Session relay for two-party signaling: a websocket per participant, a
//! channel per six-digit session id, and verbatim fan-out of whatever the
//! two members exchange.

pub mod channel;
pub mod config;
pub mod protocol;
pub mod websocket;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use channel::ChannelRegistry;
pub use config::Config;

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
}

async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

pub fn router(registry: ChannelRegistry) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws/:session_id", get(websocket::websocket_handler))
        .with_state(registry)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
