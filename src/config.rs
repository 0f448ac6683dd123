//! Configuration module for loading and parsing TOML configuration files.

use crate::auth::UserRole;
use crate::realtime::registry::MAX_ROOM_NAME_LEN;
use crate::realtime::room_for_symbol;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// Invalid configuration value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Handshake authentication configuration.
    pub auth: AuthConfig,
    /// Connection and fan-out configuration.
    pub realtime: RealtimeConfig,
    /// Price mutation scheduler configuration.
    pub scheduler: SchedulerConfig,
    /// Instruments seeded into the in-memory directory. A file without
    /// `[[instruments]]` entries seeds none.
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    /// Users seeded into the in-memory user directory. A file without
    /// `[[users]]` entries seeds none.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret used to verify bearer tokens.
    pub jwt_secret: String,
    /// Lifetime of tokens issued by [`crate::auth::JwtVerifier::issue`].
    pub token_ttl_secs: u64,
    /// Clock skew tolerated when checking `exp`.
    pub leeway_secs: u64,
    /// Upper bound for completing the connect-time handshake.
    pub handshake_timeout_ms: u64,
    /// Evict older connections when the same principal connects again.
    pub single_session_per_principal: bool,
}

impl AuthConfig {
    /// Returns the handshake window as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
            token_ttl_secs: 7 * 24 * 60 * 60,
            leeway_secs: 0,
            handshake_timeout_ms: 10_000,
            single_session_per_principal: false,
        }
    }
}

/// Real-time fan-out configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Frames queued per connection before sends report backpressure.
    pub outbound_buffer: usize,
    /// Maximum rooms one connection may join. `None` means unlimited.
    pub max_rooms_per_connection: Option<usize>,
    /// Interval between WebSocket pings.
    pub ping_interval_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            max_rooms_per_connection: None,
            ping_interval_secs: 30,
        }
    }
}

/// Price mutation scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether the scheduler loop runs at all.
    pub enabled: bool,
    /// Tick interval in milliseconds.
    pub interval_ms: u64,
    /// Upper bound for one tick, in milliseconds.
    pub tick_timeout_ms: u64,
    /// Price used when an instrument has no prior quote.
    pub fallback_price: f64,
    /// Maximum relative change per tick (0.01 = 1%).
    pub max_change: f64,
    /// Optional RNG seed for reproducible runs.
    pub seed: Option<u64>,
    /// Points kept per instrument by the in-memory store.
    pub history_limit: usize,
}

impl SchedulerConfig {
    /// Returns the tick interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the per-tick work bound as a [`Duration`].
    #[must_use]
    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            tick_timeout_ms: 9_000,
            fallback_price: 100.0,
            max_change: 0.01,
            seed: None,
            history_limit: 500,
        }
    }
}

/// Instrument seed entry.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    /// Ticker symbol (e.g., "AAPL").
    pub symbol: String,
    /// Human-readable name.
    pub name: String,
    /// Last known price, if any.
    #[serde(default)]
    pub last_price: Option<f64>,
    /// Whether the scheduler should simulate this instrument.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// User seed entry.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    /// User identifier, matched against the token subject.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Role carried into issued tokens.
    #[serde(default)]
    pub role: UserRole,
    /// Inactive users are refused at handshake.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file.
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Arguments
    /// * `content` - TOML content as string.
    ///
    /// # Errors
    /// Returns error if content cannot be parsed.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::InvalidValue(
                "auth.jwt_secret cannot be empty".to_string(),
            ));
        }
        if self.auth.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.handshake_timeout_ms must be positive".to_string(),
            ));
        }
        if self.realtime.outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "realtime.outbound_buffer must be positive".to_string(),
            ));
        }
        if self.realtime.ping_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "realtime.ping_interval_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.interval_ms must be positive".to_string(),
            ));
        }
        if self.scheduler.tick_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.tick_timeout_ms must be positive".to_string(),
            ));
        }
        if !(self.scheduler.fallback_price > 0.0) {
            return Err(ConfigError::InvalidValue(
                "scheduler.fallback_price must be positive".to_string(),
            ));
        }
        if !(self.scheduler.max_change > 0.0 && self.scheduler.max_change < 1.0) {
            return Err(ConfigError::InvalidValue(
                "scheduler.max_change must be between 0 and 1".to_string(),
            ));
        }

        let mut symbols = HashSet::new();
        for instrument in &self.instruments {
            if instrument.symbol.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "instrument symbol cannot be empty".to_string(),
                ));
            }
            if room_for_symbol(&instrument.symbol).chars().count() > MAX_ROOM_NAME_LEN {
                return Err(ConfigError::InvalidValue(format!(
                    "instrument symbol {} is too long for a price room",
                    instrument.symbol
                )));
            }
            if !symbols.insert(instrument.symbol.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "instrument {} is configured twice",
                    instrument.symbol
                )));
            }
            if let Some(price) = instrument.last_price
                && !(price > 0.0)
            {
                return Err(ConfigError::InvalidValue(format!(
                    "instrument {} last_price must be positive",
                    instrument.symbol
                )));
            }
        }

        for user in &self.users {
            if user.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "user id cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let instrument = |symbol: &str, name: &str, last_price: Option<f64>| InstrumentConfig {
            symbol: symbol.to_string(),
            name: name.to_string(),
            last_price,
            active: true,
        };

        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            realtime: RealtimeConfig::default(),
            scheduler: SchedulerConfig::default(),
            instruments: vec![
                instrument("AAPL", "Apple Inc.", Some(150.0)),
                instrument("GOOGL", "Alphabet Inc.", Some(2800.0)),
                instrument("MSFT", "Microsoft Corporation", None),
                instrument("TSLA", "Tesla, Inc.", None),
                instrument("AMZN", "Amazon.com, Inc.", None),
                instrument("BTC-USD", "Bitcoin USD", None),
                instrument("ETH-USD", "Ethereum USD", None),
                instrument("SPY", "SPDR S&P 500 ETF Trust", None),
            ],
            users: vec![
                UserConfig {
                    id: "admin".to_string(),
                    email: "admin@financial-pipeline.com".to_string(),
                    role: UserRole::Admin,
                    active: true,
                },
                UserConfig {
                    id: "demo".to_string(),
                    email: "demo@financial-pipeline.com".to_string(),
                    role: UserRole::User,
                    active: true,
                },
            ],
        }
    }
}
