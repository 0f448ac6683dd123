//! API request and response types.

use serde::{Deserialize, Serialize};


// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

// ============================================================================
// Instruments
// ============================================================================

/// Summary of an active instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSummary {
    /// Instrument identifier.
    pub id: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Human-readable name.
    pub name: String,
    /// Last known price.
    pub last_price: Option<f64>,
    /// Room carrying this instrument's price updates.
    pub room: String,
}

/// Response for listing instruments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentsListResponse {
    /// Active instruments.
    pub instruments: Vec<InstrumentSummary>,
}

/// A persisted price point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataResponse {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Volume.
    pub volume: i64,
    /// Bar interval.
    pub interval: String,
    /// Producer of the record.
    pub source: String,
}

/// Price history for one symbol, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryResponse {
    /// Ticker symbol.
    pub symbol: String,
    /// Recent points.
    pub points: Vec<MarketDataResponse>,
}

/// Query parameters for price history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of points.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

// ============================================================================
// Realtime
// ============================================================================

/// Member count of one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    /// Room name.
    pub room: String,
    /// Number of joined connections.
    pub members: usize,
}

/// Broadcaster counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcasterStatsResponse {
    /// Publish calls.
    pub published: u64,
    /// Frames handed to a transport.
    pub delivered: u64,
    /// Frames a transport refused.
    pub failed: u64,
}

/// Scheduler counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatsResponse {
    /// Completed ticks.
    pub ticks_completed: u64,
    /// Abandoned ticks.
    pub ticks_abandoned: u64,
    /// Time of the last completed tick.
    pub last_tick_at: Option<String>,
}

/// Real-time introspection response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeStatsResponse {
    /// Live connections.
    pub connections: usize,
    /// Non-empty rooms.
    pub rooms: Vec<RoomSummary>,
    /// Broadcaster counters.
    pub broadcaster: BroadcasterStatsResponse,
    /// Scheduler counters.
    pub scheduler: SchedulerStatsResponse,
}

impl RealtimeStatsResponse {
    /// Returns the member count of `room`, zero if it has none.
    #[must_use]
    pub fn members_of(&self, room: &str) -> usize {
        self.rooms
            .iter()
            .find(|summary| summary.room == room)
            .map_or(0, |summary| summary.members)
    }
}

// ============================================================================
// WebSocket payloads
// ============================================================================

/// Payload of the `connected` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    /// Identifier assigned by the server.
    pub connection_id: String,
    /// Authenticated user.
    pub user_id: String,
}

/// Payload of the `price:update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Instrument identifier.
    pub instrument_id: String,
    /// Ticker symbol.
    pub symbol: String,
    /// New price.
    pub price: f64,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

/// Returns the price room for `symbol`.
#[must_use]
pub fn price_room(symbol: &str) -> String {
    format!("instrument-price:{symbol}")
}
