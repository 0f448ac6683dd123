//! Application state management.

use crate::auth::{Authenticator, JwtVerifier};
use crate::config::Config;
use crate::db::{DatabasePool, PgMarketStore};
use crate::realtime::{Broadcaster, ConnectionRegistry, RegistryPolicy};
use crate::simulation::{PriceScheduler, PriceShock, UniformShock};
use crate::store::{InMemoryMarketStore, InstrumentDirectory, PriceStore, UserDirectory};
use std::sync::Arc;
use tracing::info;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Live connections and room membership.
    pub registry: Arc<ConnectionRegistry>,
    /// Room fan-out.
    pub broadcaster: Arc<Broadcaster>,
    /// Handshake authentication.
    pub authenticator: Arc<Authenticator>,
    /// Instrument directory.
    pub directory: Arc<dyn InstrumentDirectory>,
    /// Price history storage.
    pub store: Arc<dyn PriceStore>,
    /// Price mutation scheduler.
    pub scheduler: Arc<PriceScheduler>,
    /// Optional database pool.
    pub db: Option<DatabasePool>,
}

/// The three collaborators the core depends on.
struct Collaborators {
    directory: Arc<dyn InstrumentDirectory>,
    store: Arc<dyn PriceStore>,
    users: Arc<dyn UserDirectory>,
}

impl Collaborators {
    fn in_memory(config: &Config) -> Self {
        let memory = Arc::new(InMemoryMarketStore::from_config(config));
        info!(
            instruments = memory.instrument_count(),
            "Using in-memory market store"
        );
        Self {
            directory: memory.clone(),
            store: memory.clone(),
            users: memory,
        }
    }

    fn postgres(db: &DatabasePool) -> Self {
        let pg = Arc::new(PgMarketStore::new(db.clone()));
        info!("Using PostgreSQL market store");
        Self {
            directory: pg.clone(),
            store: pg.clone(),
            users: pg,
        }
    }
}

impl AppState {
    /// Creates state backed by the in-memory store seeded from `config`.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let shock = Box::new(UniformShock::from_config(&config.scheduler));
        let collaborators = Collaborators::in_memory(&config);
        Self::assemble(config, collaborators, None, shock)
    }

    /// Like [`AppState::from_config`], with an explicit price shock source.
    #[must_use]
    pub fn with_shock(config: Config, shock: Box<dyn PriceShock>) -> Self {
        let collaborators = Collaborators::in_memory(&config);
        Self::assemble(config, collaborators, None, shock)
    }

    /// Creates state backed by PostgreSQL.
    #[must_use]
    pub fn with_database(config: Config, db: DatabasePool) -> Self {
        let shock = Box::new(UniformShock::from_config(&config.scheduler));
        let collaborators = Collaborators::postgres(&db);
        Self::assemble(config, collaborators, Some(db), shock)
    }

    fn assemble(
        config: Config,
        collaborators: Collaborators,
        db: Option<DatabasePool>,
        shock: Box<dyn PriceShock>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy {
            max_rooms_per_connection: config.realtime.max_rooms_per_connection,
            single_session_per_principal: config.auth.single_session_per_principal,
        }));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let authenticator = Arc::new(Authenticator::new(
            JwtVerifier::new(&config.auth),
            collaborators.users,
        ));
        let scheduler = Arc::new(PriceScheduler::with_shock(
            Arc::clone(&collaborators.directory),
            Arc::clone(&collaborators.store),
            Arc::clone(&broadcaster),
            config.scheduler.clone(),
            shock,
        ));

        Self {
            config: Arc::new(config),
            registry,
            broadcaster,
            authenticator,
            directory: collaborators.directory,
            store: collaborators.store,
            scheduler,
            db,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::from_config(Config::default())
    }
}
