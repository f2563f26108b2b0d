//! Engine configuration.
//!
//! Supplied once at construction and never re-read. Loading is layered:
//! defaults, then an optional TOML file, then `EXTGAP_*` environment variables.
//! The binary applies CLI overrides on top before calling [`EngineConfig::validate`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_NOTIONAL_USD: f64 = 1000.0;
pub const DEFAULT_ENTRY_FEE_RATE: f64 = 0.0002; // 2 bps
pub const DEFAULT_EXIT_FEE_RATE: f64 = 0.0002; // 2 bps
pub const DEFAULT_SLIPPAGE_RATE: f64 = 0.0001; // 1 bps per leg
pub const DEFAULT_EXPIRY_SECS: i64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("notional must be a positive finite number, got {0}")]
    InvalidNotional(f64),

    #[error("{name} must be a non-negative finite rate, got {value}")]
    InvalidRate { name: &'static str, value: f64 },

    #[error("expiry must be positive and representable, got {0}s")]
    InvalidExpiry(i64),

    #[error("invalid interval '{0}' (expected e.g. 1m, 5m, 1h, 4h, 1d)")]
    InvalidInterval(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Kline interval, kept in whole minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    minutes: u32,
}

impl Timeframe {
    const SUPPORTED: &'static [u32] = &[1, 3, 5, 15, 30, 60, 120, 240, 360, 480, 720, 1440];

    pub fn from_minutes(minutes: u32) -> Result<Self, ConfigError> {
        if Self::SUPPORTED.contains(&minutes) {
            Ok(Self { minutes })
        } else {
            Err(ConfigError::InvalidInterval(format!("{}m", minutes)))
        }
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes as i64)
    }

    pub fn as_millis(&self) -> i64 {
        self.minutes as i64 * 60_000
    }

    /// True if `open_time` sits exactly on a timeframe boundary (epoch-aligned)
    pub fn is_aligned(&self, open_time: DateTime<Utc>) -> bool {
        open_time.timestamp_millis().rem_euclid(self.as_millis()) == 0
    }

    /// Binance stream notation (`5m`, `1h`, `1d`)
    pub fn as_binance_interval(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minutes % 1440 == 0 {
            write!(f, "{}d", self.minutes / 1440)
        } else if self.minutes % 60 == 0 {
            write!(f, "{}h", self.minutes / 60)
        } else {
            write!(f, "{}m", self.minutes)
        }
    }
}

impl FromStr for Timeframe {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let minutes = parse_interval_minutes(s)?;
        Self::from_minutes(minutes)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

/// Reporting cadence for periodic statistics; any positive number of minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsInterval {
    minutes: u32,
}

impl StatsInterval {
    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes as i64)
    }
}

impl Default for StatsInterval {
    fn default() -> Self {
        Self { minutes: 240 }
    }
}

impl FromStr for StatsInterval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let minutes = parse_interval_minutes(s)?;
        Ok(Self { minutes })
    }
}

impl fmt::Display for StatsInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minutes % 60 == 0 {
            write!(f, "{}h", self.minutes / 60)
        } else {
            write!(f, "{}m", self.minutes)
        }
    }
}

/// Parse `10m`, `4h`, `1d` or bare minutes
fn parse_interval_minutes(s: &str) -> Result<u32, ConfigError> {
    let trimmed = s.trim().to_lowercase();
    let invalid = || ConfigError::InvalidInterval(s.to_string());

    let (digits, multiplier) = match trimmed.chars().last() {
        Some('m') => (&trimmed[..trimmed.len() - 1], 1),
        Some('h') => (&trimmed[..trimmed.len() - 1], 60),
        Some('d') => (&trimmed[..trimmed.len() - 1], 1440),
        Some(_) => (trimmed.as_str(), 1),
        None => return Err(invalid()),
    };

    let value: u32 = digits.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Per-instance engine parameters (one symbol, one timeframe)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub notional_usd: f64,
    pub entry_fee_rate: f64,
    pub exit_fee_rate: f64,
    pub slippage_rate: f64,
    pub expiry_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe { minutes: 5 },
            notional_usd: DEFAULT_NOTIONAL_USD,
            entry_fee_rate: DEFAULT_ENTRY_FEE_RATE,
            exit_fee_rate: DEFAULT_EXIT_FEE_RATE,
            slippage_rate: DEFAULT_SLIPPAGE_RATE,
            expiry_secs: DEFAULT_EXPIRY_SECS,
        }
    }
}

impl EngineConfig {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            ..Self::default()
        }
    }

    /// Load defaults, then `path` (if given and present), then `EXTGAP_*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        let loaded: Self = builder
            .add_source(::config::Environment::with_prefix("EXTGAP"))
            .build()?
            .try_deserialize()?;

        Ok(loaded)
    }

    /// Reject configurations the engine must never start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if !self.notional_usd.is_finite() || self.notional_usd <= 0.0 {
            return Err(ConfigError::InvalidNotional(self.notional_usd));
        }

        let rates = [
            ("entry_fee_rate", self.entry_fee_rate),
            ("exit_fee_rate", self.exit_fee_rate),
            ("slippage_rate", self.slippage_rate),
        ];
        for (name, value) in rates {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidRate { name, value });
            }
        }

        self.try_expiry()?;

        Ok(())
    }

    /// Expiry as a duration; fails for non-positive or out-of-range seconds
    pub fn try_expiry(&self) -> Result<Duration, ConfigError> {
        match Duration::try_seconds(self.expiry_secs) {
            Some(expiry) if self.expiry_secs > 0 => Ok(expiry),
            _ => Err(ConfigError::InvalidExpiry(self.expiry_secs)),
        }
    }

    /// Expiry of a validated config; falls back to the default when out of range
    pub fn expiry(&self) -> Duration {
        self.try_expiry()
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_EXPIRY_SECS))
    }

    /// Fee charged on entry: exchange fee plus modeled slippage
    pub fn entry_cost_rate(&self) -> f64 {
        self.entry_fee_rate + self.slippage_rate
    }

    pub fn exit_cost_rate(&self) -> f64 {
        self.exit_fee_rate + self.slippage_rate
    }
}
