use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source table {} does not exist", path.display())]
    Missing { path: PathBuf },
    #[error("failed to read source table {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot reach {url}: {reason}")]
    Connection { url: String, reason: String },
    #[error("sink stopped responding before batch {batch}: {reason}")]
    Unhealthy { batch: usize, reason: String },
    #[error("request to {url} failed with status {status}: {message}")]
    Request {
        url: String,
        status: u16,
        message: String,
    },
    #[error("request to {url} still failing after {attempts} attempts: {reason}")]
    Transient {
        url: String,
        attempts: u32,
        reason: String,
    },
    #[error("task {task} failed: {reason}")]
    TaskFailed { task: u64, reason: String },
    #[error("task {task} not processed after {waited:?}")]
    TaskTimeout { task: u64, waited: Duration },
    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("bulk indexer is closed")]
    Closed,
    #[error("bulk worker panicked")]
    WorkerPanicked,
    #[error("sink must be initialized before indexing")]
    NotInitialized,
    #[error("an indexing run is already in progress or has completed")]
    AlreadyRunning,
}

impl SinkError {
    /// Whether the error aborts the whole run rather than a single batch of documents.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SinkError::Request { .. } | SinkError::TaskFailed { .. } | SinkError::TaskTimeout { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration for {field}: '{value}'")]
    Duration { field: String, value: String },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("{0}")]
    Invalid(String),
}
