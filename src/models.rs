//! Domain types and request/response DTOs.

use crate::auth::UserRole;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// ============================================================================
// Domain Types
// ============================================================================

/// A tradable instrument as seen by the instrument directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    /// Unique identifier.
    pub id: Uuid,
    /// Ticker symbol.
    pub symbol: String,
    /// Human-readable name.
    pub name: String,
    /// Last known quote, if any.
    pub last_price: Option<Decimal>,
    /// Whether the instrument is simulated.
    pub active: bool,
}

/// One simulated price, broadcast as the `price:update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    /// Instrument identifier.
    pub instrument_id: Uuid,
    /// Ticker symbol.
    pub symbol: String,
    /// New price, two decimal places.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Time the price was generated.
    pub timestamp: DateTime<Utc>,
}

/// Bar interval of a persisted market data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataInterval {
    /// One minute bars.
    OneMinute,
    /// Five minute bars.
    FiveMinutes,
    /// Hourly bars.
    Hourly,
    /// Daily bars.
    Daily,
}

impl DataInterval {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataInterval::OneMinute => "one_minute",
            DataInterval::FiveMinutes => "five_minutes",
            DataInterval::Hourly => "hourly",
            DataInterval::Daily => "daily",
        }
    }
}

/// Source tag for points produced by the price scheduler.
pub const SIMULATOR_SOURCE: &str = "SIMULATOR";

/// A persisted market data point.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataRecord {
    /// Instrument identifier.
    pub instrument_id: Uuid,
    /// Ticker symbol.
    pub symbol: String,
    /// Bar timestamp.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: i64,
    /// Bar interval.
    pub interval: DataInterval,
    /// Producer of the record.
    pub source: String,
}

impl MarketDataRecord {
    /// Builds a flat bar from a simulated price point.
    #[must_use]
    pub fn from_price_point(point: &PricePoint, volume: i64) -> Self {
        Self {
            instrument_id: point.instrument_id,
            symbol: point.symbol.clone(),
            timestamp: point.timestamp,
            open: point.price,
            high: point.price,
            low: point.price,
            close: point.price,
            volume,
            interval: DataInterval::FiveMinutes,
            source: SIMULATOR_SOURCE.to_string(),
        }
    }
}

/// A user known to the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// User identifier (token subject).
    pub id: String,
    /// Email address.
    pub email: String,
    /// Role.
    pub role: UserRole,
    /// Whether the account is enabled.
    pub active: bool,
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Summary of an active instrument.
#[derive(Debug, Serialize, ToSchema)]
pub struct InstrumentSummary {
    /// Instrument identifier.
    pub id: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Human-readable name.
    pub name: String,
    /// Last known price in dollars.
    pub last_price: Option<f64>,
    /// Room carrying this instrument's price updates.
    pub room: String,
}

impl From<&Instrument> for InstrumentSummary {
    fn from(instrument: &Instrument) -> Self {
        Self {
            id: instrument.id.to_string(),
            symbol: instrument.symbol.clone(),
            name: instrument.name.clone(),
            last_price: instrument.last_price.and_then(|p| p.to_f64()),
            room: crate::realtime::room_for_symbol(&instrument.symbol),
        }
    }
}

/// Response for listing instruments.
#[derive(Debug, Serialize, ToSchema)]
pub struct InstrumentsListResponse {
    /// Active instruments.
    pub instruments: Vec<InstrumentSummary>,
}

/// A persisted price point.
#[derive(Debug, Serialize, ToSchema)]
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

impl From<&MarketDataRecord> for MarketDataResponse {
    fn from(record: &MarketDataRecord) -> Self {
        Self {
            timestamp: record.timestamp.to_rfc3339(),
            open: record.open.to_f64().unwrap_or_default(),
            high: record.high.to_f64().unwrap_or_default(),
            low: record.low.to_f64().unwrap_or_default(),
            close: record.close.to_f64().unwrap_or_default(),
            volume: record.volume,
            interval: record.interval.as_str().to_string(),
            source: record.source.clone(),
        }
    }
}

/// Response for a symbol's price history, newest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct PriceHistoryResponse {
    /// Ticker symbol.
    pub symbol: String,
    /// Recent points, newest first.
    pub points: Vec<MarketDataResponse>,
}

/// Query parameters for price history.
#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Maximum number of points (default 50, max 1000).
    pub limit: Option<usize>,
}

/// Member count of one room.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSummary {
    /// Room name.
    pub room: String,
    /// Number of joined connections.
    pub members: usize,
}

/// Cumulative broadcaster counters.
#[derive(Debug, Serialize, ToSchema)]
pub struct BroadcasterStatsResponse {
    /// Publish calls.
    pub published: u64,
    /// Frames handed to a transport.
    pub delivered: u64,
    /// Frames a transport refused.
    pub failed: u64,
}

/// Scheduler counters.
#[derive(Debug, Serialize, ToSchema)]
pub struct SchedulerStatsResponse {
    /// Ticks that ran to completion.
    pub ticks_completed: u64,
    /// Ticks abandoned (directory down or timeout).
    pub ticks_abandoned: u64,
    /// RFC 3339 time of the last completed tick.
    pub last_tick_at: Option<String>,
}

/// Real-time introspection response.
#[derive(Debug, Serialize, ToSchema)]
pub struct RealtimeStatsResponse {
    /// Live connections.
    pub connections: usize,
    /// Non-empty rooms with their member counts.
    pub rooms: Vec<RoomSummary>,
    /// Broadcaster counters.
    pub broadcaster: BroadcasterStatsResponse,
    /// Scheduler counters.
    pub scheduler: SchedulerStatsResponse,
}
