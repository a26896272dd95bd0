use std::time::Duration;

use chrono::FixedOffset;

use crate::domain::order::TaxRate;
use crate::utils::RetryConfig;

// ============================================================================
// Application Configuration
// ============================================================================
//
// Every setting comes from the environment (a `.env` file is loaded first
// by main). Unset variables fall back to defaults; malformed values fail
// startup instead of being silently replaced.
//
// | Variable                        | Default   |
// |---------------------------------|-----------|
// | HTTP_HOST                       | 0.0.0.0   |
// | HTTP_PORT                       | 8080      |
// | DATABASE_URL                    | (memory)  |
// | DATABASE_MAX_CONNECTIONS        | 10        |
// | REDIS_URL                       | (unset)   |
// | ORDER_NUMBER_PREFIX             | DH        |
// | ORDER_NUMBER_UTC_OFFSET_HOURS   | 7         |
// | DEFAULT_TAX_RATE_BPS            | 0         |
// | LOCK_TIMEOUT_MS                 | 2000 (>0) |
// | RETRY_MAX_ATTEMPTS              | 3         |
// | RETRY_INITIAL_DELAY_MS          | 50        |
// | RETRY_MAX_DELAY_MS              | 1000      |
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_host: String,
    pub http_port: u16,
    /// PostgreSQL connection string; `None` runs on the in-memory store
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Redis backs the order-number counter when set
    pub redis_url: Option<String>,
    pub order_number_prefix: String,
    pub order_number_utc_offset_hours: i32,
    pub default_tax_rate: TaxRate,
    pub lock_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            database_url: None,
            database_max_connections: 10,
            redis_url: None,
            order_number_prefix: "DH".to_string(),
            order_number_utc_offset_hours: 7,
            default_tax_rate: TaxRate::ZERO,
            lock_timeout: Duration::from_millis(2000),
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            http_host: lookup("HTTP_HOST").unwrap_or(defaults.http_host),
            http_port: parse(&lookup, "HTTP_PORT")?.unwrap_or(defaults.http_port),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.database_max_connections),
            redis_url: lookup("REDIS_URL").filter(|url| !url.is_empty()),
            order_number_prefix: lookup("ORDER_NUMBER_PREFIX")
                .unwrap_or(defaults.order_number_prefix),
            order_number_utc_offset_hours: parse(&lookup, "ORDER_NUMBER_UTC_OFFSET_HOURS")?
                .unwrap_or(defaults.order_number_utc_offset_hours),
            default_tax_rate: parse::<u32, _>(&lookup, "DEFAULT_TAX_RATE_BPS")?
                .map(TaxRate::from_bps)
                .unwrap_or(defaults.default_tax_rate),
            lock_timeout: parse(&lookup, "LOCK_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            retry: RetryConfig {
                max_attempts: parse(&lookup, "RETRY_MAX_ATTEMPTS")?
                    .unwrap_or(defaults.retry.max_attempts),
                initial_delay: parse(&lookup, "RETRY_INITIAL_DELAY_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_delay),
                max_delay: parse(&lookup, "RETRY_MAX_DELAY_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_delay),
                ..defaults.retry
            },
        };

        config.order_number_offset()?;
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "RETRY_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        // PostgreSQL reads a zero lock_timeout as "wait forever"
        if config.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "LOCK_TIMEOUT_MS",
                value: "0".to_string(),
            });
        }

        Ok(config)
    }

    /// Time zone used for the date part of order numbers
    pub fn order_number_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.order_number_utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                key: "ORDER_NUMBER_UTC_OFFSET_HOURS",
                value: self.order_number_utc_offset_hours.to_string(),
            })
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
