//! Collaborator interfaces for instruments, price history and users.
//!
//! The real-time core only talks to these traits. Two implementations ship:
//! [`InMemoryMarketStore`] (default) and [`crate::db::PgMarketStore`]
//! (when `DATABASE_URL` is set).

mod memory;

pub use memory::InMemoryMarketStore;

use crate::error::{PersistenceError, UpstreamUnavailable};
use crate::models::{Instrument, MarketDataRecord, User};
use async_trait::async_trait;

/// Source of the instruments the scheduler simulates.
#[async_trait]
pub trait InstrumentDirectory: Send + Sync {
    /// Lists active instruments together with their last known price.
    async fn list_active(&self) -> Result<Vec<Instrument>, UpstreamUnavailable>;

    /// Looks up an instrument by symbol, active or not.
    async fn find_by_symbol(&self, symbol: &str)
    -> Result<Option<Instrument>, UpstreamUnavailable>;
}

/// Time-series storage for market data points.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Appends a point and makes its close the instrument's last price.
    async fn append(&self, record: &MarketDataRecord) -> Result<(), PersistenceError>;

    /// Returns up to `limit` points for a symbol, newest first.
    async fn history(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<MarketDataRecord>, PersistenceError>;
}

/// Identity lookups used at handshake.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns the user if it exists and is active.
    async fn find_active_user_by_id(&self, id: &str) -> Result<Option<User>, UpstreamUnavailable>;
}
