//! Runtime configuration from the environment.
//!
//! Loaded once at startup. The provider API key is required and missing it
//! is a startup error; everything else has a default suitable for local
//! runs.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::provider::DEFAULT_BASE_URL;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATABASE_URL: &str = "sqlite:stormwatch.db?mode=rwc";
const DEFAULT_CACHE_TTL_SECS: u64 = 600;
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 3600;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_CONCURRENT_CITIES: usize = 8;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the operational HTTP endpoints.
    pub port: u16,
    /// SQLite connection string.
    pub database_url: String,
    /// API key for the weather provider.
    pub provider_api_key: String,
    /// Weather provider API root; overridable for staging or tests.
    pub provider_base_url: String,
    /// Per-call timeout for provider requests.
    pub provider_timeout: Duration,
    /// How long a cached snapshot stays fresh.
    pub cache_ttl: Duration,
    /// Cadence of the alert check batch.
    pub check_interval: Duration,
    /// Bound on concurrently processed cities within one run.
    pub max_concurrent_cities: usize,
    /// Minimum interval between repeat notifications for one alert.
    /// Unset preserves the historical behavior of notifying every run
    /// the condition holds.
    pub notify_cooldown: Option<Duration>,
}

impl Config {
    /// Load configuration from `STORMWATCH_*` / `OPENWEATHER_*` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let provider_api_key =
            env::var("OPENWEATHER_API_KEY").context("OPENWEATHER_API_KEY must be set")?;

        Ok(Self {
            port: parse_env("STORMWATCH_PORT")?.unwrap_or(DEFAULT_PORT),
            database_url: env::var("STORMWATCH_DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            provider_api_key,
            provider_base_url: env::var("OPENWEATHER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            provider_timeout: Duration::from_secs(
                parse_env("STORMWATCH_PROVIDER_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
            ),
            cache_ttl: Duration::from_secs(
                parse_env("STORMWATCH_CACHE_TTL_SECS")?.unwrap_or(DEFAULT_CACHE_TTL_SECS),
            ),
            check_interval: Duration::from_secs(
                parse_env("STORMWATCH_CHECK_INTERVAL_SECS")?.unwrap_or(DEFAULT_CHECK_INTERVAL_SECS),
            ),
            max_concurrent_cities: parse_env("STORMWATCH_MAX_CONCURRENT_CITIES")?
                .unwrap_or(DEFAULT_MAX_CONCURRENT_CITIES),
            notify_cooldown: parse_env("STORMWATCH_NOTIFY_COOLDOWN_SECS")?
                .map(Duration::from_secs),
        })
    }
}

/// Parse an optional environment variable, erroring on malformed values
/// rather than silently falling back to a default.
fn parse_env<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {name}: {e}")),
        Err(_) => Ok(None),
    }
}
