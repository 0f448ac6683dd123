//! Row types mapped from the database tables.

use crate::auth::UserRole;
use crate::models::{DataInterval, Instrument, MarketDataRecord, User};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// Instrument joined with its real-time quote.
#[derive(Debug, Clone, FromRow)]
pub struct InstrumentRow {
    /// Unique identifier.
    pub id: Uuid,
    /// Ticker symbol.
    pub symbol: String,
    /// Human-readable name.
    pub name: String,
    /// Whether the instrument is simulated.
    pub is_active: bool,
    /// Price from `real_time_quotes`, if a quote exists.
    pub last_price: Option<Decimal>,
}

impl From<InstrumentRow> for Instrument {
    fn from(row: InstrumentRow) -> Self {
        Self {
            id: row.id,
            symbol: row.symbol,
            name: row.name,
            last_price: row.last_price,
            active: row.is_active,
        }
    }
}

/// Market data bar joined with its instrument symbol.
#[derive(Debug, Clone, FromRow)]
pub struct MarketDataRow {
    /// Instrument identifier.
    pub instrument_id: Uuid,
    /// Ticker symbol.
    pub symbol: String,
    /// Bar timestamp.
    pub recorded_at: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Volume.
    pub volume: i64,
    /// Bar interval, as stored.
    pub bar_interval: String,
    /// Producer of the record.
    pub source: String,
}

impl From<MarketDataRow> for MarketDataRecord {
    fn from(row: MarketDataRow) -> Self {
        let interval = match row.bar_interval.as_str() {
            "one_minute" => DataInterval::OneMinute,
            "hourly" => DataInterval::Hourly,
            "daily" => DataInterval::Daily,
            _ => DataInterval::FiveMinutes,
        };

        Self {
            instrument_id: row.instrument_id,
            symbol: row.symbol,
            timestamp: row.recorded_at,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            interval,
            source: row.source,
        }
    }
}

/// User account row.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    /// User identifier.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Role name ("admin" or "user").
    pub role: String,
    /// Whether the account is enabled.
    pub is_active: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            role: if row.role.eq_ignore_ascii_case("admin") {
                UserRole::Admin
            } else {
                UserRole::User
            },
            active: row.is_active,
        }
    }
}
