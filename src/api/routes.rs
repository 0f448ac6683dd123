//! Route configuration.

use crate::api::{handlers, websocket};
use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;

/// Creates the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // WebSocket
        .route("/ws", get(websocket::ws_handler))
        // Instruments
        .route("/api/v1/instruments", get(handlers::list_instruments))
        .route(
            "/api/v1/instruments/{symbol}/history",
            get(handlers::get_price_history),
        )
        // Real-time statistics
        .route("/api/v1/realtime/stats", get(handlers::get_realtime_stats))
        .with_state(state)
}
