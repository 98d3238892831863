use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::pool::PoolConfig;
use crate::retry::RetryConfig;
use crate::scraper::ScraperConfig;

/// All tunables of the acquisition engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub scraper: ScraperConfig,
    pub retry: RetryConfig,
}

impl EngineConfig {
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Read overrides from environment variables. Unset variables keep
    /// their defaults.
    ///
    /// - `HERALD_FAILURE_THRESHOLD`
    /// - `HERALD_COOLDOWN_SECS`
    /// - `HERALD_CACHE_MAX_ENTRIES`
    /// - `HERALD_CACHE_ENABLED`
    /// - `HERALD_POOL_REFRESH_SECS`
    /// - `HERALD_MAX_RETRIES`
    /// - `HERALD_BASE_DELAY_MS`
    /// - `HERALD_MAX_DELAY_MS`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`EngineConfig::from_env`], reading through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Some(n) = parse_var::<u32>(&lookup, "HERALD_FAILURE_THRESHOLD")? {
            if n == 0 {
                return Err(AppError::ConfigError(
                    "HERALD_FAILURE_THRESHOLD must be at least 1".into(),
                ));
            }
            config.breaker.failure_threshold = n;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HERALD_COOLDOWN_SECS")? {
            config.breaker.recovery_timeout = Duration::from_secs(secs);
            config.breaker.max_recovery_timeout =
                config.breaker.max_recovery_timeout.max(Duration::from_secs(secs));
        }
        if let Some(n) = parse_var::<usize>(&lookup, "HERALD_CACHE_MAX_ENTRIES")? {
            if n == 0 {
                return Err(AppError::ConfigError(
                    "HERALD_CACHE_MAX_ENTRIES must be at least 1; set HERALD_CACHE_ENABLED=false to disable caching".into(),
                ));
            }
            config.cache.max_entries = n;
        }
        if let Some(enabled) = parse_var::<bool>(&lookup, "HERALD_CACHE_ENABLED")? {
            config.scraper.cache_enabled = enabled;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HERALD_POOL_REFRESH_SECS")? {
            config.pool.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "HERALD_MAX_RETRIES")? {
            config.retry.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "HERALD_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "HERALD_MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }

        if config.retry.max_delay < config.retry.base_delay {
            return Err(AppError::ConfigError(format!(
                "HERALD_MAX_DELAY_MS ({}) is below HERALD_BASE_DELAY_MS ({})",
                config.retry.max_delay.as_millis(),
                config.retry.base_delay.as_millis()
            )));
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::ConfigError(format!("Invalid {key} '{raw}'"))),
    }
}
