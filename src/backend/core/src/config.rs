//! Configuration management.
//!
//! Settings are layered: an optional file (TOML, YAML or JSON, chosen by
//! extension) and then environment variables prefixed with `BATCHFLOW`,
//! using `__` as the nesting separator:
//!
//! ```text
//! BATCHFLOW__RUNNER__MAX_CONCURRENCY=8
//! BATCHFLOW__RUNNER__PER_JOB_TIMEOUT=30s
//! BATCHFLOW__LOGGING__LEVEL=debug
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{BatchflowError, Result};
use crate::jobs::{BackoffPolicy, OrderingPolicy, RunnerConfig};
use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "BATCHFLOW";
const ENV_SEPARATOR: &str = "__";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Runner name used in logs and metric labels
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum number of jobs running at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retries allowed after the first attempt
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Per-attempt timeout, e.g. "30s"
    #[serde(default, with = "humantime_serde")]
    pub per_job_timeout: Option<Duration>,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    #[serde(default)]
    pub ordering: OrderingPolicy,

    /// Throughput measurement window, e.g. "10s"
    #[serde(default = "default_throughput_window", with = "humantime_serde")]
    pub throughput_window: Duration,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_concurrency: default_max_concurrency(),
            retry_limit: default_retry_limit(),
            per_job_timeout: None,
            backoff: BackoffPolicy::default(),
            ordering: OrderingPolicy::default(),
            throughput_window: default_throughput_window(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

// Default value functions
fn default_name() -> String { "batchflow".to_string() }
fn default_max_concurrency() -> usize { 4 }
fn default_retry_limit() -> u32 { 3 }
fn default_throughput_window() -> Duration { Duration::from_secs(10) }
fn default_event_buffer_size() -> usize { 1024 }

impl RunnerSettings {
    /// Convert into a validated [`RunnerConfig`].
    pub fn to_runner_config(&self) -> Result<RunnerConfig> {
        let config = RunnerConfig {
            name: self.name.clone(),
            max_concurrency: self.max_concurrency,
            retry_limit: self.retry_limit,
            per_job_timeout: self.per_job_timeout,
            backoff: self.backoff.clone(),
            ordering: self.ordering.clone(),
            throughput_window: self.throughput_window,
            event_buffer_size: self.event_buffer_size,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Settings {
    /// Load configuration from the environment only.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BatchflowError::new(
                crate::error::ErrorCode::MissingConfiguration,
                format!("Configuration file not found: {}", path.display()),
            ));
        }

        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Load from `path` when given, otherwise from the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }

    /// Check the runner and logging sections.
    pub fn validate(&self) -> Result<()> {
        self.runner.to_runner_config()?;
        self.logging.env_filter().map_err(|e| {
            BatchflowError::invalid_config(format!("invalid log level directive: {}", e))
                .with_context("level", &self.logging.level)
        })?;
        Ok(())
    }
}
