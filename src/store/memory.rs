//! In-memory collaborators seeded from configuration.

use super::{InstrumentDirectory, PriceStore, UserDirectory};
use crate::config::Config;
use crate::error::{PersistenceError, UpstreamUnavailable};
use crate::models::{Instrument, MarketDataRecord, User};
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::VecDeque;
use uuid::Uuid;

/// Instrument directory, price store and user directory kept in process.
#[derive(Debug)]
pub struct InMemoryMarketStore {
    /// Instruments keyed by symbol.
    instruments: DashMap<String, Instrument>,
    /// Recent records per symbol, oldest first.
    history: DashMap<String, VecDeque<MarketDataRecord>>,
    /// Users keyed by id.
    users: DashMap<String, User>,
    /// Records kept per symbol.
    history_limit: usize,
}

impl InMemoryMarketStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            instruments: DashMap::new(),
            history: DashMap::new(),
            users: DashMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Creates a store seeded with the configured instruments and users.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let store = Self::new(config.scheduler.history_limit);

        for seed in &config.instruments {
            store.upsert_instrument(Instrument {
                id: Uuid::new_v4(),
                symbol: seed.symbol.clone(),
                name: seed.name.clone(),
                last_price: seed.last_price.and_then(Decimal::from_f64),
                active: seed.active,
            });
        }

        for seed in &config.users {
            store.upsert_user(User {
                id: seed.id.clone(),
                email: seed.email.clone(),
                role: seed.role,
                active: seed.active,
            });
        }

        store
    }

    /// Inserts or replaces an instrument.
    pub fn upsert_instrument(&self, instrument: Instrument) {
        self.instruments.insert(instrument.symbol.clone(), instrument);
    }

    /// Inserts or replaces a user.
    pub fn upsert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// Enables or disables simulation of an instrument.
    ///
    /// Returns `false` if the symbol is unknown.
    pub fn set_active(&self, symbol: &str, active: bool) -> bool {
        match self.instruments.get_mut(symbol) {
            Some(mut instrument) => {
                instrument.active = active;
                true
            }
            None => false,
        }
    }

    /// Number of instruments, active or not.
    #[must_use]
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }
}

#[async_trait]
impl InstrumentDirectory for InMemoryMarketStore {
    async fn list_active(&self) -> Result<Vec<Instrument>, UpstreamUnavailable> {
        let mut active: Vec<Instrument> = self
            .instruments
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(active)
    }

    async fn find_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<Instrument>, UpstreamUnavailable> {
        Ok(self.instruments.get(symbol).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl PriceStore for InMemoryMarketStore {
    async fn append(&self, record: &MarketDataRecord) -> Result<(), PersistenceError> {
        {
            let mut instrument = self.instruments.get_mut(&record.symbol).ok_or_else(|| {
                PersistenceError::Rejected(format!("unknown instrument {}", record.symbol))
            })?;
            if instrument.id != record.instrument_id {
                return Err(PersistenceError::Rejected(format!(
                    "instrument id mismatch for {}",
                    record.symbol
                )));
            }
            instrument.last_price = Some(record.close);
        }

        let mut points = self.history.entry(record.symbol.clone()).or_default();
        points.push_back(record.clone());
        while points.len() > self.history_limit {
            points.pop_front();
        }

        Ok(())
    }

    async fn history(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<MarketDataRecord>, PersistenceError> {
        Ok(self
            .history
            .get(symbol)
            .map(|points| points.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl UserDirectory for InMemoryMarketStore {
    async fn find_active_user_by_id(&self, id: &str) -> Result<Option<User>, UpstreamUnavailable> {
        Ok(self
            .users
            .get(id)
            .filter(|user| user.active)
            .map(|user| user.value().clone()))
    }
}
