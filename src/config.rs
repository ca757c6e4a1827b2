//! Configuration module - CLI arguments and settings

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::asset::DEFAULT_MAX_RACE_RETRIES;
use crate::queue::{
    Backoff, QueueConfig, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_CONCURRENCY,
    DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES,
};

/// Optional configuration parameters for Config::new()
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    /// Explicit retry delays; takes precedence over exponential backoff
    pub retry_delays_ms: Option<Vec<u64>>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub max_race_retries: Option<u32>,
    pub no_adaptive: bool,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub owner_id: String,
    pub database_path: PathBuf,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff: Backoff,
    pub max_race_retries: u32,
    pub no_adaptive: bool,
}

impl Config {
    /// Create a new Config with required owner and database path, plus optional settings
    pub fn new(
        owner_id: String,
        database_path: PathBuf,
        options: ConfigOptions,
    ) -> Result<Arc<Self>> {
        let owner_id = owner_id.trim().to_string();
        if owner_id.is_empty() {
            return Err(anyhow!("owner_id cannot be empty"));
        }

        if database_path.as_os_str().is_empty() {
            return Err(anyhow!("database_path cannot be empty"));
        }

        let concurrency = options.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(anyhow!("concurrency must be at least 1"));
        }

        let backoff = match options.retry_delays_ms {
            Some(delays) if !delays.is_empty() => {
                Backoff::Explicit(delays.into_iter().map(Duration::from_millis).collect())
            }
            Some(_) => return Err(anyhow!("retry_delays_ms cannot be empty")),
            None => {
                let base = options
                    .base_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_BASE_DELAY);
                let max = options
                    .max_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_MAX_DELAY);
                if max < base {
                    return Err(anyhow!(
                        "max_delay_ms ({}) must not be below base_delay_ms ({})",
                        max.as_millis(),
                        base.as_millis()
                    ));
                }
                Backoff::Exponential { base, max }
            }
        };

        Ok(Arc::new(Self {
            owner_id,
            database_path,
            concurrency,
            max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            backoff,
            max_race_retries: options.max_race_retries.unwrap_or(DEFAULT_MAX_RACE_RETRIES),
            no_adaptive: options.no_adaptive,
        }))
    }

    /// Scheduler settings derived from this config
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            concurrency: self.concurrency,
            retry: RetryPolicy::new(self.max_retries, self.backoff.clone()),
            adaptive: !self.no_adaptive,
        }
    }
}

/// Parse a comma separated list of millisecond delays, e.g. `100,500,2000`
pub fn parse_delay_list(value: &str) -> Result<Vec<u64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|e| anyhow!("invalid delay {:?}: {}", s, e))
        })
        .collect()
}
