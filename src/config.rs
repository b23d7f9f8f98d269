use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors raised while reading the environment
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Maximum pooled database connections
    #[serde(default = "default_db_pool_size")]
    pub db_pool_max_size: u32,

    /// Read API listen address
    #[serde(default = "default_bind_addr")]
    pub api_bind_addr: String,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Market data provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Bearer token, sent only when present
    #[serde(default)]
    pub access_token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for provider requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds, doubled on each retry
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Upper bound for any single wait, including `Retry-After`
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// HTTP statuses worth retrying
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

/// Job scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Job bodies that may run at the same time
    #[serde(default = "default_scheduler_pool_size")]
    pub pool_size: usize,

    /// Seconds a firing may wait for a pool slot before it is discarded
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_secs: u64,
}

/// Fetch and sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Upper bound for concurrent per-instrument fetches
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Candles kept per (instrument, timeframe) partition
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Historical responses with fewer candles are skipped
    #[serde(default = "default_retention")]
    pub historical_min_candles: usize,

    /// Days covered by the historical window
    #[serde(default = "default_lookback_days")]
    pub historical_lookback_days: i64,

    /// Market timezone as minutes east of UTC (IST = 330)
    #[serde(default = "default_market_offset")]
    pub market_utc_offset_minutes: i32,

    /// Apply the retention trim after intraday upserts too
    #[serde(default = "default_true")]
    pub intraday_trim_enabled: bool,
}

/// Instrument snapshot location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,

    /// Exchange segment prepended to bare keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl AppConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let config = AppConfig {
            database_url,
            db_pool_max_size: parse_or(&lookup, "DB_POOL_MAX_SIZE", default_db_pool_size())?,
            api_bind_addr: lookup("API_BIND_ADDR").unwrap_or_else(default_bind_addr),
            provider: ProviderConfig {
                base_url: lookup("UPSTOX_BASE_URL").unwrap_or_else(default_provider_base_url),
                access_token: lookup("UPSTOX_ACCESS_TOKEN").filter(|v| !v.trim().is_empty()),
                timeout_secs: parse_or(&lookup, "PROVIDER_TIMEOUT_SECS", default_provider_timeout())?,
                retry: RetryConfig {
                    max_retries: parse_or(&lookup, "PROVIDER_MAX_RETRIES", default_max_retries())?,
                    backoff_ms: parse_or(&lookup, "PROVIDER_BACKOFF_MS", default_backoff_ms())?,
                    ..RetryConfig::default()
                },
            },
            scheduler: SchedulerConfig {
                pool_size: parse_or(&lookup, "SCHEDULER_POOL_SIZE", default_scheduler_pool_size())?,
                misfire_grace_secs: parse_or(
                    &lookup,
                    "SCHEDULER_MISFIRE_GRACE_SECS",
                    default_misfire_grace(),
                )?,
            },
            ingestion: IngestionConfig {
                max_workers: parse_or(&lookup, "FETCH_MAX_WORKERS", default_max_workers())?,
                retention: parse_or(&lookup, "CANDLE_RETENTION", default_retention())?,
                historical_min_candles: parse_or(&lookup, "HISTORICAL_MIN_CANDLES", default_retention())?,
                historical_lookback_days: parse_or(
                    &lookup,
                    "HISTORICAL_LOOKBACK_DAYS",
                    default_lookback_days(),
                )?,
                market_utc_offset_minutes: parse_or(
                    &lookup,
                    "MARKET_UTC_OFFSET_MINUTES",
                    default_market_offset(),
                )?,
                intraday_trim_enabled: parse_or(&lookup, "INTRADAY_TRIM_ENABLED", default_true())?,
            },
            snapshot: SnapshotConfig {
                csv_path: lookup("INSTRUMENTS_CSV_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_csv_path),
                key_prefix: lookup("INSTRUMENT_KEY_PREFIX").unwrap_or_else(default_key_prefix),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("SCHEDULER_POOL_SIZE", self.scheduler.pool_size),
            ("FETCH_MAX_WORKERS", self.ingestion.max_workers),
            ("CANDLE_RETENTION", self.ingestion.retention),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        self.ingestion.market_offset()?;
        Ok(())
    }
}

impl IngestionConfig {
    /// Market timezone as a fixed offset
    pub fn market_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.market_utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Invalid {
                name: "MARKET_UTC_OFFSET_MINUTES",
                value: self.market_utc_offset_minutes.to_string(),
                reason: "offset out of range".to_string(),
            }
        })
    }
}

impl SchedulerConfig {
    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_secs)
    }
}

impl RetryConfig {
    /// Wait before retry number `retry` (1-based): `backoff_ms * 2^(retry - 1)`, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        let millis = self.backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn is_retriable_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            access_token: None,
            timeout_secs: default_provider_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_scheduler_pool_size(),
            misfire_grace_secs: default_misfire_grace(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            retention: default_retention(),
            historical_min_candles: default_retention(),
            historical_lookback_days: default_lookback_days(),
            market_utc_offset_minutes: default_market_offset(),
            intraday_trim_enabled: true,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            csv_path: default_csv_path(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

// Default value functions for serde
fn default_db_pool_size() -> u32 {
    20
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_provider_base_url() -> String {
    "https://api.upstox.com".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    300
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_scheduler_pool_size() -> usize {
    10
}

fn default_misfire_grace() -> u64 {
    120
}

fn default_max_workers() -> usize {
    20
}

fn default_retention() -> usize {
    100
}

fn default_lookback_days() -> i64 {
    14
}

fn default_market_offset() -> i32 {
    330
}

fn default_true() -> bool {
    true
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("data/NSE_500.csv")
}

fn default_key_prefix() -> String {
    "NSE_EQ|".to_string()
}
