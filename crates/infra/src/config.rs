//! Process configuration loaded from the environment.
//!
//! Everything is read once at startup and handed to the components that need
//! it. A variable that is set but cannot be parsed is an error; only unset (or
//! blank) variables fall back to defaults.

use std::time::Duration;

use thiserror::Error;

use courier_engine::RetryPolicy;
use courier_engine::backoff::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_MIN_DELAY,
};

pub const DEFAULT_WORKER_URL: &str = "http://localhost:8080";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_DLQ_KEY: &str = "courier:dlq";
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_PORT: u16 = 7071;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Effective configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourierConfig {
    pub worker_url: String,
    pub redis_url: String,
    pub dlq_key: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub min_delay_ms: u64,
    pub delivery_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub port: u16,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            worker_url: DEFAULT_WORKER_URL.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            dlq_key: DEFAULT_DLQ_KEY.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: millis(DEFAULT_BASE_DELAY),
            max_delay_ms: millis(DEFAULT_MAX_DELAY),
            min_delay_ms: millis(DEFAULT_MIN_DELAY),
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
            health_timeout_ms: DEFAULT_HEALTH_TIMEOUT_MS,
            port: DEFAULT_PORT,
        }
    }
}

impl CourierConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            worker_url: get("WORKER_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.worker_url),
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            dlq_key: get("DLQ_KEY").unwrap_or(defaults.dlq_key),
            max_retries: parse(get("MAX_RETRIES"), "MAX_RETRIES", defaults.max_retries)?,
            base_delay_ms: parse(get("BASE_DELAY_MS"), "BASE_DELAY_MS", defaults.base_delay_ms)?,
            max_delay_ms: parse(get("MAX_DELAY_MS"), "MAX_DELAY_MS", defaults.max_delay_ms)?,
            min_delay_ms: parse(get("MIN_DELAY_MS"), "MIN_DELAY_MS", defaults.min_delay_ms)?,
            delivery_timeout_ms: parse(
                get("DELIVERY_TIMEOUT_MS"),
                "DELIVERY_TIMEOUT_MS",
                defaults.delivery_timeout_ms,
            )?,
            health_timeout_ms: parse(
                get("HEALTH_TIMEOUT_MS"),
                "HEALTH_TIMEOUT_MS",
                defaults.health_timeout_ms,
            )?,
            port: parse(get("PORT"), "PORT", defaults.port)?,
        };

        if config.max_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_DELAY_MS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_min_delay(Duration::from_millis(self.min_delay_ms))
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Seconds a client should wait before resubmitting, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        self.max_delay_ms.div_ceil(1000)
    }
}

fn parse<T>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
