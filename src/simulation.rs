//! Price mutation scheduler: periodic synthetic prices, broadcast and persisted.

use crate::config::SchedulerConfig;
use crate::error::UpstreamUnavailable;
use crate::models::{MarketDataRecord, PricePoint};
use crate::realtime::{Broadcaster, PRICE_UPDATE_EVENT, room_for_symbol};
use crate::store::{InstrumentDirectory, PriceStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lowest price the scheduler will ever produce.
pub const MIN_PRICE: Decimal = dec!(0.01);

/// Mocked traded volume range for persisted bars, `[MIN, MAX)`.
pub const MIN_VOLUME: i64 = 100;
const MAX_VOLUME: i64 = 1100;

/// Computes the next price from `last` and a relative `change`.
///
/// `change` is clamped to `[-max_change, max_change]`. The result is rounded
/// half away from zero to two decimal places and never drops below
/// [`MIN_PRICE`].
#[must_use]
pub fn next_price(last: Decimal, change: Decimal, max_change: Decimal) -> Decimal {
    let bound = max_change.abs();
    let change = change.clamp(-bound, bound);
    let raw = last * (Decimal::ONE + change);
    raw.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .max(MIN_PRICE)
}

/// Source of per-instrument random price changes.
pub trait PriceShock: Send {
    /// Draws a relative change in `[-max_change, max_change]`.
    fn change(&mut self, max_change: Decimal) -> Decimal;

    /// Draws the mocked volume for a persisted bar.
    fn volume(&mut self) -> i64 {
        MIN_VOLUME
    }
}

/// Uniformly distributed changes from a [`StdRng`].
pub struct UniformShock {
    rng: StdRng,
}

impl UniformShock {
    /// Seeds from `seed`, or from OS entropy when `None`.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng }
    }

    /// Uses the seed from the scheduler configuration.
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.seed)
    }
}

impl PriceShock for UniformShock {
    fn change(&mut self, max_change: Decimal) -> Decimal {
        let bound = max_change.abs();
        if bound.is_zero() {
            return Decimal::ZERO;
        }
        let unit: f64 = self.rng.random_range(-1.0..=1.0);
        Decimal::from_f64(unit)
            .map(|u| u * bound)
            .unwrap_or(Decimal::ZERO)
    }

    fn volume(&mut self) -> i64 {
        self.rng.random_range(MIN_VOLUME..MAX_VOLUME)
    }
}

/// Always returns the same change.
#[derive(Debug, Clone, Copy)]
pub struct FixedShock {
    change: Decimal,
    volume: i64,
}

impl FixedShock {
    /// A shock that always yields `change`.
    #[must_use]
    pub fn new(change: Decimal) -> Self {
        Self {
            change,
            volume: MIN_VOLUME,
        }
    }

    /// Overrides the reported volume.
    #[must_use]
    pub fn with_volume(mut self, volume: i64) -> Self {
        self.volume = volume;
        self
    }
}

impl PriceShock for FixedShock {
    fn change(&mut self, _max_change: Decimal) -> Decimal {
        self.change
    }

    fn volume(&mut self) -> i64 {
        self.volume
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Active instruments processed.
    pub instruments: usize,
    /// Price updates published.
    pub published: usize,
    /// Frames queued across all subscribers.
    pub delivered: usize,
    /// Publishes that failed to encode.
    pub publish_failed: usize,
    /// Points persisted within the tick bound.
    pub persisted: usize,
    /// Points the store refused or failed to write.
    pub persist_failed: usize,
    /// Writes still running when the tick bound was reached. They finish in
    /// the background.
    pub persist_pending: usize,
    /// Points not written because the previous write for the same instrument
    /// was still in flight.
    pub persist_skipped: usize,
}

/// Cumulative scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    /// Ticks that published prices.
    pub ticks_completed: u64,
    /// Ticks dropped because the directory was down or did not answer in time.
    pub ticks_abandoned: u64,
    /// Start time of the last completed tick.
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Periodically moves every active instrument's price and fans it out.
pub struct PriceScheduler {
    directory: Arc<dyn InstrumentDirectory>,
    store: Arc<dyn PriceStore>,
    broadcaster: Arc<Broadcaster>,
    config: SchedulerConfig,
    max_change: Decimal,
    fallback_price: Decimal,
    shock: Mutex<Box<dyn PriceShock>>,
    tick_lock: tokio::sync::Mutex<()>,
    last_published: Mutex<HashMap<Uuid, Decimal>>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    ticks_completed: AtomicU64,
    ticks_abandoned: AtomicU64,
    last_tick_at: Mutex<Option<DateTime<Utc>>>,
}

impl PriceScheduler {
    /// Creates a scheduler with a [`UniformShock`] seeded from `config`.
    #[must_use]
    pub fn new(
        directory: Arc<dyn InstrumentDirectory>,
        store: Arc<dyn PriceStore>,
        broadcaster: Arc<Broadcaster>,
        config: SchedulerConfig,
    ) -> Self {
        let shock = UniformShock::from_config(&config);
        Self::with_shock(directory, store, broadcaster, config, Box::new(shock))
    }

    /// Creates a scheduler with an explicit shock source.
    #[must_use]
    pub fn with_shock(
        directory: Arc<dyn InstrumentDirectory>,
        store: Arc<dyn PriceStore>,
        broadcaster: Arc<Broadcaster>,
        config: SchedulerConfig,
        shock: Box<dyn PriceShock>,
    ) -> Self {
        let max_change = Decimal::from_f64(config.max_change).unwrap_or(dec!(0.01));
        let fallback_price = Decimal::from_f64(config.fallback_price)
            .map(|p| p.round_dp(2))
            .unwrap_or(dec!(100.00));
        Self {
            directory,
            store,
            broadcaster,
            config,
            max_change,
            fallback_price,
            shock: Mutex::new(shock),
            tick_lock: tokio::sync::Mutex::new(()),
            last_published: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            ticks_completed: AtomicU64::new(0),
            ticks_abandoned: AtomicU64::new(0),
            last_tick_at: Mutex::new(None),
        }
    }

    /// Runs one tick.
    ///
    /// Every active instrument gets a new price which is published to its
    /// room right away. Each persistence write runs as its own task, so a
    /// slow or failing store never holds up a broadcast; failures are logged
    /// by the write itself. The tick waits for the writes until the tick
    /// bound and leaves any still running to finish in the background. An
    /// instrument whose previous write is still in flight is not written
    /// again until that write settles.
    ///
    /// Ticks never overlap: a call waits for any tick already in progress.
    /// Prices compound from the last published value, so the walk continues
    /// even while persistence lags behind.
    ///
    /// # Errors
    /// Returns [`UpstreamUnavailable`] if the instrument directory fails or
    /// does not answer within the tick bound. Nothing is published in that
    /// case.
    pub async fn run_tick(&self) -> Result<TickReport, UpstreamUnavailable> {
        let _running = self.tick_lock.lock().await;
        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.tick_timeout();

        let listed = timeout_at(deadline, self.directory.list_active())
            .await
            .unwrap_or_else(|_| {
                Err(UpstreamUnavailable(
                    "instrument directory did not answer within the tick bound".to_string(),
                ))
            });
        let instruments = match listed {
            Ok(instruments) => instruments,
            Err(e) => {
                self.ticks_abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Tick abandoned: instrument directory unavailable");
                return Err(e);
            }
        };

        let mut report = TickReport {
            instruments: instruments.len(),
            ..TickReport::default()
        };
        let mut writes = JoinSet::new();

        for instrument in &instruments {
            let last = self
                .last_published
                .lock()
                .get(&instrument.id)
                .copied()
                .or(instrument.last_price)
                .unwrap_or(self.fallback_price);
            let (change, volume) = {
                let mut shock = self.shock.lock();
                (shock.change(self.max_change), shock.volume())
            };

            let point = PricePoint {
                instrument_id: instrument.id,
                symbol: instrument.symbol.clone(),
                price: next_price(last, change, self.max_change),
                timestamp: started_at,
            };
            self.last_published.lock().insert(point.instrument_id, point.price);

            if self.in_flight.lock().insert(point.instrument_id) {
                let record = MarketDataRecord::from_price_point(&point, volume);
                writes.spawn(persist(
                    Arc::clone(&self.store),
                    Arc::clone(&self.in_flight),
                    record,
                ));
            } else {
                report.persist_skipped += 1;
                warn!(symbol = %point.symbol, "Previous write still in flight, point not persisted");
            }

            let room = room_for_symbol(&instrument.symbol);
            match self.broadcaster.publish(&room, PRICE_UPDATE_EVENT, &point) {
                Ok(publish) => {
                    report.published += 1;
                    report.delivered += publish.delivered;
                    debug!(symbol = %point.symbol, price = %point.price, recipients = publish.delivered, "Price published");
                }
                Err(e) => {
                    report.publish_failed += 1;
                    warn!(symbol = %point.symbol, error = %e, "Failed to publish price");
                }
            }
        }

        loop {
            match timeout_at(deadline, writes.join_next()).await {
                Ok(Some(Ok(true))) => report.persisted += 1,
                Ok(Some(Ok(false))) => report.persist_failed += 1,
                Ok(Some(Err(e))) => {
                    report.persist_failed += 1;
                    warn!(error = %e, "Persistence task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    report.persist_pending = writes.len();
                    warn!(
                        pending = report.persist_pending,
                        tick_timeout_ms = self.config.tick_timeout_ms,
                        "Writes still running past the tick bound"
                    );
                    writes.detach_all();
                    break;
                }
            }
        }

        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        *self.last_tick_at.lock() = Some(started_at);

        debug!(
            instruments = report.instruments,
            published = report.published,
            persisted = report.persisted,
            "Tick completed"
        );
        Ok(report)
    }

    /// Ticks on a fixed interval until the task is aborted.
    ///
    /// Missed ticks are skipped rather than bunched up. Each tick bounds its
    /// own work by the configured timeout.
    pub async fn run(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Price scheduler disabled");
            return;
        }

        info!(
            interval_ms = self.config.interval_ms,
            tick_timeout_ms = self.config.tick_timeout_ms,
            "Starting price scheduler"
        );

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if let Ok(report) = self.run_tick().await
                && (report.persist_failed > 0 || report.publish_failed > 0)
            {
                warn!(
                    persist_failed = report.persist_failed,
                    publish_failed = report.publish_failed,
                    "Tick completed with failures"
                );
            }
        }
    }

    /// Returns the cumulative counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            ticks_abandoned: self.ticks_abandoned.load(Ordering::Relaxed),
            last_tick_at: *self.last_tick_at.lock(),
        }
    }

    /// The scheduler configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

/// Marks an instrument's write as in flight until dropped, including when
/// the write task is aborted.
struct InFlightWrite {
    writes: Arc<Mutex<HashSet<Uuid>>>,
    instrument_id: Uuid,
}

impl Drop for InFlightWrite {
    fn drop(&mut self) {
        self.writes.lock().remove(&self.instrument_id);
    }
}

/// Appends one record and logs its failure. Returns whether it was stored.
async fn persist(
    store: Arc<dyn PriceStore>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    record: MarketDataRecord,
) -> bool {
    let _in_flight = InFlightWrite {
        writes: in_flight,
        instrument_id: record.instrument_id,
    };
    match store.append(&record).await {
        Ok(()) => true,
        Err(e) => {
            warn!(symbol = %record.symbol, error = %e, "Failed to persist price point");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::models::Instrument;
    use crate::realtime::test_support::{RecordingTransport, principal};
    use crate::realtime::{ConnectionRegistry, RegistryPolicy};
    use crate::store::InMemoryMarketStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use uuid::Uuid;

    fn instrument(symbol: &str, last_price: Option<Decimal>) -> Instrument {
        Instrument {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            name: format!("{symbol} Inc."),
            last_price,
            active: true,
        }
    }

    struct Harness {
        store: Arc<InMemoryMarketStore>,
        registry: Arc<ConnectionRegistry>,
        scheduler: PriceScheduler,
    }

    fn harness(instruments: Vec<Instrument>, shock: Box<dyn PriceShock>) -> Harness {
        let store = Arc::new(InMemoryMarketStore::new(10));
        for i in instruments {
            store.upsert_instrument(i);
        }
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy::default()));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let scheduler = PriceScheduler::with_shock(
            store.clone(),
            store.clone(),
            broadcaster,
            SchedulerConfig::default(),
            shock,
        );
        Harness {
            store,
            registry,
            scheduler,
        }
    }

    fn subscribe(registry: &ConnectionRegistry, room: &str) -> Arc<RecordingTransport> {
        let transport = Arc::new(RecordingTransport::default());
        let id = registry.admit(principal("watcher"), transport.clone()).id;
        registry.join(id, room).unwrap();
        transport
    }

    #[test]
    fn test_next_price_half_percent_up() {
        assert_eq!(next_price(dec!(150.00), dec!(0.005), dec!(0.01)), dec!(150.75));
    }

    #[test]
    fn test_next_price_clamps_change() {
        assert_eq!(next_price(dec!(100.00), dec!(0.5), dec!(0.01)), dec!(101.00));
        assert_eq!(next_price(dec!(100.00), dec!(-0.5), dec!(0.01)), dec!(99.00));
    }

    #[test]
    fn test_next_price_rounds_half_away_from_zero() {
        // 1.50 * 1.01 = 1.515
        assert_eq!(next_price(dec!(1.50), dec!(0.01), dec!(0.01)), dec!(1.52));
        // 1.50 * 0.99 = 1.485
        assert_eq!(next_price(dec!(1.50), dec!(-0.01), dec!(0.01)), dec!(1.49));
    }

    #[test]
    fn test_next_price_never_below_floor() {
        assert_eq!(next_price(dec!(0.001), dec!(-0.01), dec!(0.01)), MIN_PRICE);
        assert_eq!(next_price(dec!(0.01), dec!(-0.01), dec!(0.01)), MIN_PRICE);
    }

    #[test]
    fn test_uniform_shock_stays_within_bound() {
        let mut shock = UniformShock::new(Some(7));
        let max = dec!(0.01);
        let round = |d: Decimal| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        for last in [dec!(0.50), dec!(1.50), dec!(99.99), dec!(150.00), dec!(2800.00), dec!(43210.12)] {
            for _ in 0..200 {
                let change = shock.change(max);
                assert!(change >= -max && change <= max);

                let next = next_price(last, change, max);
                assert!(next >= round(last * dec!(0.99)), "{next} below bound for {last}");
                assert!(next <= round(last * dec!(1.01)), "{next} above bound for {last}");
                assert_eq!(next.scale(), 2);
            }
        }
    }

    #[test]
    fn test_uniform_shock_seed_is_reproducible() {
        let mut a = UniformShock::new(Some(42));
        let mut b = UniformShock::new(Some(42));
        for _ in 0..10 {
            assert_eq!(a.change(dec!(0.01)), b.change(dec!(0.01)));
            let volume = a.volume();
            assert_eq!(volume, b.volume());
            assert!((MIN_VOLUME..MAX_VOLUME).contains(&volume));
        }
    }

    #[tokio::test]
    async fn test_tick_moves_publishes_and_persists() {
        let aapl = instrument("AAPL", Some(dec!(150.00)));
        let h = harness(
            vec![aapl.clone()],
            Box::new(FixedShock::new(dec!(0.005)).with_volume(640)),
        );
        let watcher = subscribe(&h.registry, "instrument-price:AAPL");
        let bystander = Arc::new(RecordingTransport::default());
        h.registry.admit(principal("bystander"), bystander.clone());

        let report = h.scheduler.run_tick().await.unwrap();
        assert_eq!(report.instruments, 1);
        assert_eq!(report.published, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.persisted, 1);

        let frames = watcher.frames();
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["event"], "price:update");
        assert_eq!(frame["data"]["symbol"], "AAPL");
        assert_eq!(frame["data"]["price"], 150.75);
        assert_eq!(frame["data"]["instrumentId"], aapl.id.to_string());
        assert!(frame["data"]["timestamp"].is_string());
        assert!(bystander.frames().is_empty());

        let history = h.store.history("AAPL", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].close, dec!(150.75));
        assert_eq!(history[0].source, "SIMULATOR");
        assert_eq!(history[0].volume, 640);

        let updated = h.store.find_by_symbol("AAPL").await.unwrap().unwrap();
        assert_eq!(updated.last_price, Some(dec!(150.75)));
    }

    #[tokio::test]
    async fn test_tick_compounds_from_persisted_price() {
        let h = harness(
            vec![instrument("AAPL", Some(dec!(100.00)))],
            Box::new(FixedShock::new(dec!(0.01))),
        );
        h.scheduler.run_tick().await.unwrap();
        h.scheduler.run_tick().await.unwrap();

        let last = h.store.find_by_symbol("AAPL").await.unwrap().unwrap();
        assert_eq!(last.last_price, Some(dec!(102.01)));
        assert_eq!(h.scheduler.stats().ticks_completed, 2);
        assert!(h.scheduler.stats().last_tick_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_price_uses_fallback() {
        let h = harness(
            vec![instrument("MSFT", None)],
            Box::new(FixedShock::new(dec!(0.005))),
        );
        let watcher = subscribe(&h.registry, "instrument-price:MSFT");

        h.scheduler.run_tick().await.unwrap();

        let frame: serde_json::Value = serde_json::from_str(&watcher.frames()[0]).unwrap();
        assert_eq!(frame["data"]["price"], 100.5);
    }

    struct FlakyStore {
        inner: Arc<InMemoryMarketStore>,
        failing_symbol: &'static str,
    }

    #[async_trait]
    impl PriceStore for FlakyStore {
        async fn append(&self, record: &MarketDataRecord) -> Result<(), PersistenceError> {
            if record.symbol == self.failing_symbol {
                return Err(PersistenceError::Database("connection reset".to_string()));
            }
            self.inner.append(record).await
        }

        async fn history(
            &self,
            symbol: &str,
            limit: usize,
        ) -> Result<Vec<MarketDataRecord>, PersistenceError> {
            self.inner.history(symbol, limit).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_isolated() {
        let store = Arc::new(InMemoryMarketStore::new(10));
        store.upsert_instrument(instrument("AAPL", Some(dec!(150.00))));
        store.upsert_instrument(instrument("TSLA", Some(dec!(200.00))));
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy::default()));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let flaky = Arc::new(FlakyStore {
            inner: Arc::clone(&store),
            failing_symbol: "AAPL",
        });
        let scheduler = PriceScheduler::with_shock(
            store.clone(),
            flaky,
            broadcaster,
            SchedulerConfig::default(),
            Box::new(FixedShock::new(dec!(0.005))),
        );
        let aapl = subscribe(&registry, "instrument-price:AAPL");
        let tsla = subscribe(&registry, "instrument-price:TSLA");

        let report = scheduler.run_tick().await.unwrap();

        assert_eq!(report.published, 2);
        assert_eq!(report.persisted, 1);
        assert_eq!(report.persist_failed, 1);
        assert_eq!(aapl.frames().len(), 1);
        assert_eq!(tsla.frames().len(), 1);
        assert!(store.history("AAPL", 10).await.unwrap().is_empty());
        assert_eq!(store.history("TSLA", 10).await.unwrap().len(), 1);
    }

    struct DownDirectory;

    #[async_trait]
    impl InstrumentDirectory for DownDirectory {
        async fn list_active(&self) -> Result<Vec<Instrument>, UpstreamUnavailable> {
            Err(UpstreamUnavailable("directory offline".to_string()))
        }

        async fn find_by_symbol(
            &self,
            _symbol: &str,
        ) -> Result<Option<Instrument>, UpstreamUnavailable> {
            Err(UpstreamUnavailable("directory offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_directory_outage_abandons_tick() {
        let store = Arc::new(InMemoryMarketStore::new(10));
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy::default()));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let scheduler = PriceScheduler::with_shock(
            Arc::new(DownDirectory),
            store,
            Arc::clone(&broadcaster),
            SchedulerConfig::default(),
            Box::new(FixedShock::new(dec!(0.005))),
        );

        assert!(scheduler.run_tick().await.is_err());
        let stats = scheduler.stats();
        assert_eq!(stats.ticks_abandoned, 1);
        assert_eq!(stats.ticks_completed, 0);
        assert_eq!(broadcaster.stats().published, 0);
    }

    #[tokio::test]
    async fn test_run_loop_ticks_until_aborted() {
        let store = Arc::new(InMemoryMarketStore::new(10));
        store.upsert_instrument(instrument("AAPL", Some(dec!(150.00))));
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy::default()));
        let broadcaster = Arc::new(Broadcaster::new(registry));
        let config = SchedulerConfig {
            interval_ms: 10,
            tick_timeout_ms: 1_000,
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(PriceScheduler::with_shock(
            store.clone(),
            store,
            broadcaster,
            config,
            Box::new(FixedShock::new(dec!(0.001))),
        ));

        let handle = tokio::spawn(Arc::clone(&scheduler).run());
        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.stats().ticks_completed < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        handle.abort();
    }

    struct SlowStore {
        inner: Arc<InMemoryMarketStore>,
        delay: Duration,
        active: AtomicU64,
        max_active: AtomicU64,
        closes: Mutex<Vec<Decimal>>,
    }

    impl SlowStore {
        fn new(inner: Arc<InMemoryMarketStore>, delay: Duration) -> Self {
            Self {
                inner,
                delay,
                active: AtomicU64::new(0),
                max_active: AtomicU64::new(0),
                closes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PriceStore for SlowStore {
        async fn append(&self, record: &MarketDataRecord) -> Result<(), PersistenceError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let result = self.inner.append(record).await;
            self.closes.lock().push(record.close);
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn history(
            &self,
            symbol: &str,
            limit: usize,
        ) -> Result<Vec<MarketDataRecord>, PersistenceError> {
            self.inner.history(symbol, limit).await
        }
    }

    struct SlowDirectory {
        inner: Arc<InMemoryMarketStore>,
        delay: Duration,
    }

    #[async_trait]
    impl InstrumentDirectory for SlowDirectory {
        async fn list_active(&self) -> Result<Vec<Instrument>, UpstreamUnavailable> {
            tokio::time::sleep(self.delay).await;
            self.inner.list_active().await
        }

        async fn find_by_symbol(
            &self,
            symbol: &str,
        ) -> Result<Option<Instrument>, UpstreamUnavailable> {
            self.inner.find_by_symbol(symbol).await
        }
    }

    fn published_prices(transport: &RecordingTransport) -> Vec<f64> {
        transport
            .frames()
            .iter()
            .map(|frame| {
                let frame: serde_json::Value = serde_json::from_str(frame).unwrap();
                frame["data"]["price"].as_f64().unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_concurrent_ticks_run_one_after_another() {
        let store = Arc::new(InMemoryMarketStore::new(10));
        store.upsert_instrument(instrument("AAPL", Some(dec!(150.00))));
        let slow = Arc::new(SlowStore::new(Arc::clone(&store), Duration::from_millis(50)));
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy::default()));
        let scheduler = PriceScheduler::with_shock(
            store.clone(),
            slow.clone(),
            Arc::new(Broadcaster::new(Arc::clone(&registry))),
            SchedulerConfig::default(),
            Box::new(FixedShock::new(dec!(0.005))),
        );
        let watcher = subscribe(&registry, "instrument-price:AAPL");

        let (first, second) = tokio::join!(scheduler.run_tick(), scheduler.run_tick());
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.persisted, 1);
        assert_eq!(second.persisted, 1);
        assert_eq!(first.persist_skipped + second.persist_skipped, 0);
        assert_eq!(slow.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(*slow.closes.lock(), vec![dec!(150.75), dec!(151.50)]);
        assert_eq!(published_prices(&watcher), vec![150.75, 151.5]);
    }

    #[tokio::test]
    async fn test_slow_write_outlives_tick_bound() {
        let store = Arc::new(InMemoryMarketStore::new(10));
        store.upsert_instrument(instrument("AAPL", Some(dec!(150.00))));
        let slow = Arc::new(SlowStore::new(Arc::clone(&store), Duration::from_millis(200)));
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy::default()));
        let scheduler = PriceScheduler::with_shock(
            store.clone(),
            slow.clone(),
            Arc::new(Broadcaster::new(Arc::clone(&registry))),
            SchedulerConfig {
                tick_timeout_ms: 20,
                ..SchedulerConfig::default()
            },
            Box::new(FixedShock::new(dec!(0.005))),
        );
        let watcher = subscribe(&registry, "instrument-price:AAPL");

        let first = scheduler.run_tick().await.unwrap();
        assert_eq!(first.published, 1);
        assert_eq!(first.persisted, 0);
        assert_eq!(first.persist_pending, 1);

        let second = scheduler.run_tick().await.unwrap();
        assert_eq!(second.published, 1);
        assert_eq!(second.persist_skipped, 1);
        assert_eq!(second.persist_pending, 0);
        assert_eq!(published_prices(&watcher), vec![150.75, 151.5]);

        let stats = scheduler.stats();
        assert_eq!(stats.ticks_completed, 2);
        assert_eq!(stats.ticks_abandoned, 0);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !scheduler.in_flight.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*slow.closes.lock(), vec![dec!(150.75)]);
        let history = store.history("AAPL", 10).await.unwrap();
        assert_eq!(history.len(), 1);

        let third = scheduler.run_tick().await.unwrap();
        assert_eq!(third.persist_skipped, 0);
        assert_eq!(third.persist_pending, 1);
    }

    #[tokio::test]
    async fn test_run_keeps_walking_while_store_lags() {
        let store = Arc::new(InMemoryMarketStore::new(100));
        store.upsert_instrument(instrument("AAPL", Some(dec!(150.00))));
        let slow = Arc::new(SlowStore::new(Arc::clone(&store), Duration::from_millis(200)));
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy::default()));
        let scheduler = Arc::new(PriceScheduler::with_shock(
            store.clone(),
            slow.clone(),
            Arc::new(Broadcaster::new(Arc::clone(&registry))),
            SchedulerConfig {
                interval_ms: 50,
                tick_timeout_ms: 20,
                ..SchedulerConfig::default()
            },
            Box::new(FixedShock::new(dec!(0.005))),
        ));
        let watcher = subscribe(&registry, "instrument-price:AAPL");

        let handle = tokio::spawn(Arc::clone(&scheduler).run());
        tokio::time::sleep(Duration::from_millis(600)).await;
        handle.abort();

        let stats = scheduler.stats();
        assert!(stats.ticks_completed >= 3, "{stats:?}");
        assert_eq!(stats.ticks_abandoned, 0);

        let prices = published_prices(&watcher);
        assert!(prices.len() >= 3);
        assert!(prices.windows(2).all(|pair| pair[1] > pair[0]), "{prices:?}");

        tokio::time::timeout(Duration::from_secs(5), async {
            while slow.closes.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(slow.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_directory_abandons_ticks() {
        let store = Arc::new(InMemoryMarketStore::new(10));
        store.upsert_instrument(instrument("AAPL", Some(dec!(150.00))));
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy::default()));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let scheduler = Arc::new(PriceScheduler::with_shock(
            Arc::new(SlowDirectory {
                inner: Arc::clone(&store),
                delay: Duration::from_millis(200),
            }),
            store.clone(),
            Arc::clone(&broadcaster),
            SchedulerConfig {
                interval_ms: 30,
                tick_timeout_ms: 20,
                ..SchedulerConfig::default()
            },
            Box::new(FixedShock::new(dec!(0.005))),
        ));
        let watcher = subscribe(&registry, "instrument-price:AAPL");

        let handle = tokio::spawn(Arc::clone(&scheduler).run());
        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.stats().ticks_abandoned < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        handle.abort();

        assert_eq!(scheduler.stats().ticks_completed, 0);
        assert_eq!(broadcaster.stats().published, 0);
        assert!(watcher.frames().is_empty());
        assert!(store.history("AAPL", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_scheduler_returns_immediately() {
        let store = Arc::new(InMemoryMarketStore::new(10));
        let registry = Arc::new(ConnectionRegistry::new(RegistryPolicy::default()));
        let scheduler = Arc::new(PriceScheduler::new(
            store.clone(),
            store,
            Arc::new(Broadcaster::new(registry)),
            SchedulerConfig {
                enabled: false,
                ..SchedulerConfig::default()
            },
        ));

        tokio::time::timeout(Duration::from_secs(1), scheduler.run())
            .await
            .unwrap();
    }
}
