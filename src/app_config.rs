use anyhow::{Context, Result, anyhow};
use log::warn;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::jobs::{JobManagerConfig, TranslationOptions};

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Job manager settings
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Artifact storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Default options applied to new jobs
    #[serde(default)]
    pub defaults: TranslationOptions,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Job manager settings as stored in the configuration file
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JobsConfig {
    /// Worker pool capacity
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Seconds a finished job is kept before expiry
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    /// Minimum seconds between two expiry sweeps
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Default per-job deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry count for failed jobs
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds, doubled on each retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Minimum milliseconds between throttled progress reports
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            job_ttl_secs: default_job_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl JobsConfig {
    /// Convert to the job manager's settings
    pub fn to_manager_config(&self) -> JobManagerConfig {
        JobManagerConfig {
            max_workers: self.max_workers,
            job_ttl: Duration::from_secs(self.job_ttl_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            job_timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
        }
    }
}

/// Artifact storage settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Root directory for uploads, outputs and scratch files
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_job_ttl_secs() -> u64 {
    3 * 60 * 60 // 3 hours
}

fn default_cleanup_interval_secs() -> u64 {
    30 * 60
}

fn default_timeout_secs() -> u64 {
    30 * 60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000 // 1 second base backoff time, doubled on each retry
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./docjobs-data")
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.jobs.max_workers == 0 {
            return Err(anyhow!("jobs.max_workers must be greater than zero"));
        }
        if self.jobs.job_ttl_secs == 0 {
            return Err(anyhow!("jobs.job_ttl_secs must be greater than zero"));
        }
        if self.jobs.timeout_secs == 0 {
            return Err(anyhow!("jobs.timeout_secs must be greater than zero"));
        }
        if self.jobs.retry_max_delay_ms < self.jobs.retry_base_delay_ms {
            return Err(anyhow!(
                "jobs.retry_max_delay_ms ({}) must not be smaller than jobs.retry_base_delay_ms ({})",
                self.jobs.retry_max_delay_ms,
                self.jobs.retry_base_delay_ms
            ));
        }
        if self.storage.root_dir.as_os_str().is_empty() {
            return Err(anyhow!("storage.root_dir must not be empty"));
        }

        self.defaults
            .validate()
            .context("Invalid default translation options")?;

        Ok(())
    }

    /// Load configuration from a JSON file, creating it with defaults if missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file: {:?}", path))?;
            let reader = BufReader::new(file);
            let config: Config = serde_json::from_reader(reader)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            return Ok(config);
        }

        warn!("Config file not found at {:?}, creating default config.", path);
        let config = Config::default();
        let config_json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write default config to file: {:?}", path))?;

        Ok(config)
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            jobs: JobsConfig::default(),
            storage: StorageConfig::default(),
            defaults: TranslationOptions::default(),
            log_level: LogLevel::default(),
        }
    }
}
