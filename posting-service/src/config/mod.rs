//! Configuration module for posting-service.

use crate::services::Matcher;
use rust_decimal::Decimal;
use service_core::config::{self as core_config, env_or, require_env};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PostingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub timeouts: PostingTimeouts,
    pub matching: MatchConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub lease: Duration,
    pub max_attempts: i32,
    pub sweep_interval: Duration,
    pub claim_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PostingTimeouts {
    /// Bound on a whole posting unit of work.
    pub commit: Duration,
    /// Bound on waiting for a row lock inside it.
    pub lock: Duration,
}

#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub amount_tolerance: Decimal,
    pub date_window_days: i64,
    pub date_cutoff_days: i64,
    pub ambiguity_margin: f64,
    pub max_subset_size: usize,
}

impl MatchConfig {
    pub fn matcher(&self) -> Matcher {
        Matcher {
            amount_tolerance: self.amount_tolerance,
            date_window_days: self.date_window_days,
            date_cutoff_days: self.date_cutoff_days,
            ambiguity_margin: self.ambiguity_margin,
            max_subset_size: self.max_subset_size,
        }
    }
}

impl PostingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "posting-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: require_env("DATABASE_URL")?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            queue: QueueConfig {
                lease: Duration::from_secs(env_or("QUEUE_LEASE_SECS", 300)?),
                max_attempts: env_or("QUEUE_MAX_ATTEMPTS", 5)?,
                sweep_interval: Duration::from_secs(env_or("QUEUE_SWEEP_INTERVAL_SECS", 30)?),
                claim_timeout: Duration::from_millis(env_or("QUEUE_CLAIM_TIMEOUT_MS", 5000)?),
            },
            timeouts: PostingTimeouts {
                commit: Duration::from_millis(env_or("POSTING_COMMIT_TIMEOUT_MS", 10_000)?),
                lock: Duration::from_millis(env_or("POSTING_LOCK_TIMEOUT_MS", 2000)?),
            },
            matching: MatchConfig {
                amount_tolerance: env_or("MATCH_AMOUNT_TOLERANCE", Decimal::ONE)?,
                date_window_days: env_or("MATCH_DATE_WINDOW_DAYS", 3)?,
                date_cutoff_days: env_or("MATCH_DATE_CUTOFF_DAYS", 45)?,
                ambiguity_margin: env_or("MATCH_AMBIGUITY_MARGIN", 0.05)?,
                max_subset_size: env_or("MATCH_MAX_SUBSET_SIZE", 4)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_apply_when_unset() {
        env::set_var("DATABASE_URL", "postgres://localhost/posting_test");
        env::remove_var("QUEUE_LEASE_SECS");
        env::remove_var("MATCH_AMOUNT_TOLERANCE");

        let config = PostingConfig::from_env().unwrap();
        assert_eq!(config.queue.lease, Duration::from_secs(300));
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.timeouts.lock, Duration::from_millis(2000));
        assert_eq!(config.matching.amount_tolerance, Decimal::ONE);
        assert_eq!(config.matching.matcher().max_subset_size, 4);

        env::remove_var("DATABASE_URL");
    }

    #[test]
    #[serial]
    fn test_database_url_is_required() {
        env::remove_var("DATABASE_URL");
        assert!(matches!(
            PostingConfig::from_env(),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_rejected() {
        env::set_var("DATABASE_URL", "postgres://localhost/posting_test");
        env::set_var("QUEUE_MAX_ATTEMPTS", "many");
        assert!(PostingConfig::from_env().is_err());
        env::remove_var("QUEUE_MAX_ATTEMPTS");
        env::remove_var("DATABASE_URL");
    }
}
