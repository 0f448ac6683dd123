//! API request handlers.

use crate::error::ApiError;
use crate::models::{
    BroadcasterStatsResponse, HealthResponse, HistoryQuery, InstrumentSummary,
    InstrumentsListResponse, MarketDataResponse, PriceHistoryResponse, RealtimeStatsResponse,
    RoomSummary, SchedulerStatsResponse,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use std::sync::Arc;

/// Default number of history points returned.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Largest accepted history `limit`.
pub const MAX_HISTORY_LIMIT: usize = 1000;

// ============================================================================
// Health Check
// ============================================================================

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Instruments
// ============================================================================

/// List active instruments with their last known price.
#[utoipa::path(
    get,
    path = "/api/v1/instruments",
    responses(
        (status = 200, description = "Active instruments", body = InstrumentsListResponse),
        (status = 503, description = "Instrument directory unavailable")
    ),
    tag = "Instruments"
)]
pub async fn list_instruments(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InstrumentsListResponse>, ApiError> {
    let instruments = state.directory.list_active().await?;
    Ok(Json(InstrumentsListResponse {
        instruments: instruments.iter().map(InstrumentSummary::from).collect(),
    }))
}

/// Recent persisted price points for an instrument, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/instruments/{symbol}/history",
    params(
        ("symbol" = String, Path, description = "Ticker symbol"),
        HistoryQuery
    ),
    responses(
        (status = 200, description = "Price history", body = PriceHistoryResponse),
        (status = 400, description = "Invalid limit"),
        (status = 404, description = "Unknown instrument")
    ),
    tag = "Instruments"
)]
pub async fn get_price_history(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<PriceHistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit == 0 || limit > MAX_HISTORY_LIMIT {
        return Err(ApiError::InvalidRequest(format!(
            "limit must be between 1 and {MAX_HISTORY_LIMIT}"
        )));
    }

    if state.directory.find_by_symbol(&symbol).await?.is_none() {
        return Err(ApiError::NotFound(format!("Instrument {symbol} not found")));
    }

    let records = state.store.history(&symbol, limit).await?;
    Ok(Json(PriceHistoryResponse {
        symbol,
        points: records.iter().map(MarketDataResponse::from).collect(),
    }))
}

// ============================================================================
// Real-time Statistics
// ============================================================================

/// Connection, room and delivery counters.
#[utoipa::path(
    get,
    path = "/api/v1/realtime/stats",
    responses(
        (status = 200, description = "Real-time statistics", body = RealtimeStatsResponse)
    ),
    tag = "Realtime"
)]
pub async fn get_realtime_stats(State(state): State<Arc<AppState>>) -> Json<RealtimeStatsResponse> {
    let registry = state.registry.stats();
    let broadcaster = state.broadcaster.stats();
    let scheduler = state.scheduler.stats();

    Json(RealtimeStatsResponse {
        connections: registry.connections,
        rooms: registry
            .rooms
            .into_iter()
            .map(|(room, members)| RoomSummary { room, members })
            .collect(),
        broadcaster: BroadcasterStatsResponse {
            published: broadcaster.published,
            delivered: broadcaster.delivered,
            failed: broadcaster.failed,
        },
        scheduler: SchedulerStatsResponse {
            ticks_completed: scheduler.ticks_completed,
            ticks_abandoned: scheduler.ticks_abandoned,
            last_tick_at: scheduler.last_tick_at.map(|t| t.to_rfc3339()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::realtime::test_support::{RecordingTransport, principal};
    use crate::simulation::FixedShock;
    use rust_decimal_macros::dec;

    fn create_test_state() -> Arc<AppState> {
        Arc::new(AppState::with_shock(
            Config::default(),
            Box::new(FixedShock::new(dec!(0.005))),
        ))
    }

    #[tokio::test]
    async fn test_health_check() {
        let Json(health) = health_check().await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_list_instruments() {
        let state = create_test_state();
        let Json(list) = list_instruments(State(state)).await.unwrap();

        let aapl = list
            .instruments
            .iter()
            .find(|i| i.symbol == "AAPL")
            .unwrap();
        assert_eq!(aapl.last_price, Some(150.0));
        assert_eq!(aapl.room, "instrument-price:AAPL");
        assert_eq!(list.instruments.len(), Config::default().instruments.len());
    }

    #[tokio::test]
    async fn test_history_after_tick() {
        let state = create_test_state();
        state.scheduler.run_tick().await.unwrap();

        let Json(history) = get_price_history(
            State(Arc::clone(&state)),
            Path("AAPL".to_string()),
            Query(HistoryQuery { limit: None }),
        )
        .await
        .unwrap();

        assert_eq!(history.symbol, "AAPL");
        assert_eq!(history.points.len(), 1);
        assert_eq!(history.points[0].close, 150.75);
        assert_eq!(history.points[0].interval, "five_minutes");
    }

    #[tokio::test]
    async fn test_history_unknown_symbol() {
        let state = create_test_state();
        let result = get_price_history(
            State(state),
            Path("NOPE".to_string()),
            Query(HistoryQuery { limit: Some(5) }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_history_rejects_bad_limit() {
        let state = create_test_state();
        for limit in [0, MAX_HISTORY_LIMIT + 1] {
            let result = get_price_history(
                State(Arc::clone(&state)),
                Path("AAPL".to_string()),
                Query(HistoryQuery { limit: Some(limit) }),
            )
            .await;
            assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
        }
    }

    #[tokio::test]
    async fn test_realtime_stats() {
        let state = create_test_state();
        let id = state
            .registry
            .admit(principal("demo"), Arc::new(RecordingTransport::default()))
            .id;
        state.registry.join(id, "instrument-price:AAPL").unwrap();
        state.scheduler.run_tick().await.unwrap();

        let Json(stats) = get_realtime_stats(State(state)).await;
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.rooms.len(), 1);
        assert_eq!(stats.rooms[0].room, "instrument-price:AAPL");
        assert_eq!(stats.rooms[0].members, 1);
        assert_eq!(stats.broadcaster.delivered, 1);
        assert_eq!(stats.scheduler.ticks_completed, 1);
        assert!(stats.scheduler.last_tick_at.is_some());
    }
}
