//! PostgreSQL-backed collaborators.

use super::DatabasePool;
use super::schema::{InstrumentRow, MarketDataRow, UserRow};
use crate::error::{PersistenceError, UpstreamUnavailable};
use crate::models::{Instrument, MarketDataRecord, User};
use crate::store::{InstrumentDirectory, PriceStore, UserDirectory};
use async_trait::async_trait;

/// Instrument directory, price store and user directory over PostgreSQL.
#[derive(Clone)]
pub struct PgMarketStore {
    db: DatabasePool,
}

impl PgMarketStore {
    /// Wraps a connected pool.
    #[must_use]
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }
}

const INSTRUMENT_SELECT: &str = r#"
SELECT i.id, i.symbol, i.name, i.is_active, q.price AS last_price
FROM instruments i
LEFT JOIN real_time_quotes q ON q.instrument_id = i.id
"#;

#[async_trait]
impl InstrumentDirectory for PgMarketStore {
    async fn list_active(&self) -> Result<Vec<Instrument>, UpstreamUnavailable> {
        let sql = format!("{INSTRUMENT_SELECT} WHERE i.is_active = TRUE ORDER BY i.symbol");
        let rows: Vec<InstrumentRow> = sqlx::query_as(&sql).fetch_all(self.db.pool()).await?;
        Ok(rows.into_iter().map(Instrument::from).collect())
    }

    async fn find_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<Instrument>, UpstreamUnavailable> {
        let sql = format!("{INSTRUMENT_SELECT} WHERE i.symbol = $1");
        let row: Option<InstrumentRow> = sqlx::query_as(&sql)
            .bind(symbol)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(Instrument::from))
    }
}

#[async_trait]
impl PriceStore for PgMarketStore {
    async fn append(&self, record: &MarketDataRecord) -> Result<(), PersistenceError> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO market_data
                (instrument_id, recorded_at, open, high, low, close, volume, bar_interval, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (instrument_id, recorded_at, bar_interval) DO NOTHING
            "#,
        )
        .bind(record.instrument_id)
        .bind(record.timestamp)
        .bind(record.open)
        .bind(record.high)
        .bind(record.low)
        .bind(record.close)
        .bind(record.volume)
        .bind(record.interval.as_str())
        .bind(&record.source)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO real_time_quotes (instrument_id, price, quoted_at, source)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (instrument_id)
            DO UPDATE SET price = EXCLUDED.price, quoted_at = EXCLUDED.quoted_at, source = EXCLUDED.source
            "#,
        )
        .bind(record.instrument_id)
        .bind(record.close)
        .bind(record.timestamp)
        .bind(&record.source)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn history(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<MarketDataRecord>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<MarketDataRow> = sqlx::query_as(
            r#"
            SELECT m.instrument_id, i.symbol, m.recorded_at, m.open, m.high, m.low, m.close,
                   m.volume, m.bar_interval, m.source
            FROM market_data m
            JOIN instruments i ON i.id = m.instrument_id
            WHERE i.symbol = $1
            ORDER BY m.recorded_at DESC
            LIMIT $2
            "#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(MarketDataRecord::from).collect())
    }
}

#[async_trait]
impl UserDirectory for PgMarketStore {
    async fn find_active_user_by_id(&self, id: &str) -> Result<Option<User>, UpstreamUnavailable> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, role, is_active FROM users WHERE id = $1 AND is_active = TRUE",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(User::from))
    }
}
