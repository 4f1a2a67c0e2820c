use std::path::{Path, PathBuf};
use std::time::Duration;

use humantime::parse_duration;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::sink::SinkKind;
use crate::sink::retry::{DEFAULT_MAX_RETRIES, RetryPolicy};

pub const DEFAULT_INDEX_NAME: &str = "sentences";
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_FLUSH_BYTES: usize = 1_000_000;
const DEFAULT_FLUSH_INTERVAL: &str = "30s";
const DEFAULT_POLL_INTERVAL: &str = "2s";
const DEFAULT_MAX_TASK_WAIT: &str = "10m";
const DEFAULT_REQUEST_TIMEOUT: &str = "60s";

/// Fully resolved settings for one indexing run.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub sink: SinkKind,
    pub host: String,
    pub index_name: String,
    pub data_dir: PathBuf,
    pub batch_size: usize,
    pub workers: usize,
    pub flush_bytes: usize,
    pub flush_interval: Duration,
    pub poll_interval: Duration,
    pub max_task_wait: Duration,
    pub request_timeout: Duration,
    pub health_check: bool,
    pub retry: RetryPolicy,
}

/// Tuning knobs as they appear in a TOML file or on the command line. Unset fields
/// fall back to the next layer and finally to the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub sink: Option<SinkKind>,
    pub host: Option<String>,
    pub index: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub flush_bytes: Option<usize>,
    pub flush_interval: Option<String>,
    pub poll_interval: Option<String>,
    pub max_task_wait: Option<String>,
    pub max_retries: Option<u32>,
    pub request_timeout: Option<String>,
    pub health_check: Option<bool>,
}

impl RawConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Values set in `overrides` win over values set here.
    pub fn merge(self, overrides: RawConfig) -> RawConfig {
        RawConfig {
            sink: overrides.sink.or(self.sink),
            host: overrides.host.or(self.host),
            index: overrides.index.or(self.index),
            data_dir: overrides.data_dir.or(self.data_dir),
            batch_size: overrides.batch_size.or(self.batch_size),
            workers: overrides.workers.or(self.workers),
            flush_bytes: overrides.flush_bytes.or(self.flush_bytes),
            flush_interval: overrides.flush_interval.or(self.flush_interval),
            poll_interval: overrides.poll_interval.or(self.poll_interval),
            max_task_wait: overrides.max_task_wait.or(self.max_task_wait),
            max_retries: overrides.max_retries.or(self.max_retries),
            request_timeout: overrides.request_timeout.or(self.request_timeout),
            health_check: overrides.health_check.or(self.health_check),
        }
    }
}

impl IndexerConfig {
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        Self::from_raw_with_cpus(raw, num_cpus::get())
    }

    fn from_raw_with_cpus(raw: RawConfig, cpus: usize) -> Result<Self, ConfigError> {
        let sink = raw.sink.unwrap_or_default();

        let host = raw
            .host
            .map(|host| host.trim().to_string())
            .unwrap_or_else(|| sink.default_host().to_string());
        if host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }

        let index_name = raw
            .index
            .map(|index| index.trim().to_string())
            .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string());
        if index_name.is_empty() {
            return Err(ConfigError::Invalid("index name must not be empty".into()));
        }

        let batch_size = non_zero(raw.batch_size.unwrap_or(DEFAULT_BATCH_SIZE), "batch_size")?;
        let flush_bytes = non_zero(raw.flush_bytes.unwrap_or(DEFAULT_FLUSH_BYTES), "flush_bytes")?;
        let workers = non_zero(raw.workers.unwrap_or(DEFAULT_WORKERS), "workers")?;
        let workers = workers.min(cpus.max(1));

        let flush_interval =
            duration_or(raw.flush_interval, DEFAULT_FLUSH_INTERVAL, "flush_interval")?;
        let poll_interval = duration_or(raw.poll_interval, DEFAULT_POLL_INTERVAL, "poll_interval")?;
        let max_task_wait = duration_or(raw.max_task_wait, DEFAULT_MAX_TASK_WAIT, "max_task_wait")?;
        let request_timeout =
            duration_or(raw.request_timeout, DEFAULT_REQUEST_TIMEOUT, "request_timeout")?;

        let retry = RetryPolicy {
            max_retries: raw.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            ..RetryPolicy::default()
        };

        Ok(Self {
            sink,
            host,
            index_name,
            data_dir: raw.data_dir.unwrap_or_else(|| PathBuf::from(".")),
            batch_size,
            workers,
            flush_bytes,
            flush_interval,
            poll_interval,
            max_task_wait,
            request_timeout,
            health_check: raw.health_check.unwrap_or(true),
            retry,
        })
    }
}

fn non_zero(value: usize, field: &'static str) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { field });
    }
    Ok(value)
}

fn duration_or(
    value: Option<String>,
    default: &str,
    field: &'static str,
) -> Result<Duration, ConfigError> {
    parse_duration_string(value.as_deref().unwrap_or(default), field)
}

fn parse_duration_string(value: &str, field: &'static str) -> Result<Duration, ConfigError> {
    let duration = parse_duration(value.trim()).map_err(|_| ConfigError::Duration {
        field: field.to_string(),
        value: value.to_string(),
    })?;

    if duration.is_zero() {
        return Err(ConfigError::Zero { field });
    }

    Ok(duration)
}
