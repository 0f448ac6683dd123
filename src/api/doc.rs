//! OpenAPI document and the fully layered application router.

use crate::api::create_router;
use crate::models::{
    BroadcasterStatsResponse, HealthResponse, InstrumentSummary, InstrumentsListResponse,
    MarketDataResponse, PriceHistoryResponse, RealtimeStatsResponse, RoomSummary,
    SchedulerStatsResponse,
};
use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::handlers::health_check,
        crate::api::handlers::list_instruments,
        crate::api::handlers::get_price_history,
        crate::api::handlers::get_realtime_stats,
        crate::api::websocket::ws_handler,
    ),
    components(
        schemas(
            HealthResponse,
            InstrumentsListResponse,
            InstrumentSummary,
            PriceHistoryResponse,
            MarketDataResponse,
            RealtimeStatsResponse,
            RoomSummary,
            BroadcasterStatsResponse,
            SchedulerStatsResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Instruments", description = "Simulated instruments and price history"),
        (name = "Realtime", description = "Connection and fan-out statistics"),
        (name = "WebSocket", description = "Price update subscriptions"),
    ),
    info(
        title = "Price Feed API",
        version = "0.1.0",
        description = "Real-time instrument price broadcast over WebSocket",
        license(name = "MIT")
    )
)]
pub struct ApiDoc;

/// Builds the router with Swagger UI, CORS and request tracing.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
