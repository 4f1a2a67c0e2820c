pub mod bulk;
pub mod elasticsearch;
pub mod meilisearch;
pub mod retry;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use serde::Deserialize;
use tracing::info;

use crate::config::IndexerConfig;
use crate::credentials::ApiKey;
use crate::error::SinkError;
use crate::models::SentenceTable;
use crate::progress::Progress;

use self::elasticsearch::{ElasticsearchSettings, ElasticsearchSink, HttpElasticsearchClient};
use self::meilisearch::{HttpMeiliClient, MeiliSettings, MeilisearchSink};

/// A destination search engine.
///
/// `initialize` runs once before any document is sent; `index` sends every document
/// of the table and reports per-document outcomes through `progress`. Errors returned
/// from either call abort the run. Failures scoped to a batch or a document are counted
/// instead.
pub trait Sink: Send {
    fn name(&self) -> &'static str;
    fn initialize(&mut self) -> Result<(), SinkError>;
    fn index(&mut self, table: &SentenceTable, progress: Arc<Progress>) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Meilisearch,
    Elasticsearch,
}

impl SinkKind {
    pub fn default_host(self) -> &'static str {
        match self {
            SinkKind::Meilisearch => "127.0.0.1:7700",
            SinkKind::Elasticsearch => "127.0.0.1:9200",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Meilisearch => f.write_str("meilisearch"),
            SinkKind::Elasticsearch => f.write_str("elasticsearch"),
        }
    }
}

pub fn build_sink(
    config: &IndexerConfig,
    api_key: Option<&ApiKey>,
) -> Result<Box<dyn Sink>, SinkError> {
    match config.sink {
        SinkKind::Meilisearch => {
            let client = HttpMeiliClient::new(
                &config.host,
                config.request_timeout,
                api_key,
                config.retry.clone(),
            )?;
            info!(host = client.base_url(), "indexing on Meilisearch");
            Ok(Box::new(MeilisearchSink::new(
                client,
                MeiliSettings {
                    index: config.index_name.clone(),
                    batch_size: config.batch_size,
                    poll_interval: config.poll_interval,
                    max_task_wait: config.max_task_wait,
                    health_check: config.health_check,
                },
            )))
        }
        SinkKind::Elasticsearch => {
            let client = HttpElasticsearchClient::new(
                &config.host,
                config.request_timeout,
                api_key,
                config.retry.clone(),
            )?;
            info!(host = client.base_url(), "indexing on Elasticsearch");
            Ok(Box::new(ElasticsearchSink::new(
                client,
                ElasticsearchSettings {
                    index: config.index_name.clone(),
                    workers: config.workers,
                    flush_bytes: config.flush_bytes,
                    flush_interval: config.flush_interval,
                },
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub sink: &'static str,
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Created,
    Ready,
    Running,
    Finished,
}

/// Drives one sink through initialization and a single indexing run.
pub struct Pipeline {
    sink: Box<dyn Sink>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(sink: Box<dyn Sink>) -> Self {
        Self {
            sink,
            state: PipelineState::Created,
        }
    }

    pub fn initialize(&mut self) -> Result<(), SinkError> {
        match self.state {
            PipelineState::Created => {
                self.sink.initialize()?;
                self.state = PipelineState::Ready;
                Ok(())
            }
            PipelineState::Ready => Ok(()),
            PipelineState::Running | PipelineState::Finished => Err(SinkError::AlreadyRunning),
        }
    }

    pub fn run(&mut self, table: &SentenceTable) -> Result<IndexSummary, SinkError> {
        match self.state {
            PipelineState::Created => return Err(SinkError::NotInitialized),
            PipelineState::Running | PipelineState::Finished => {
                return Err(SinkError::AlreadyRunning);
            }
            PipelineState::Ready => {}
        }

        self.state = PipelineState::Running;
        let started = Instant::now();
        let progress = Arc::new(Progress::new("sentences", table.len()));
        info!(sink = self.sink.name(), documents = table.len(), "indexing started");

        let outcome = self.sink.index(table, Arc::clone(&progress));
        self.state = PipelineState::Finished;
        outcome?;

        Ok(IndexSummary {
            sink: self.sink.name(),
            total: progress.total(),
            indexed: progress.indexed(),
            failed: progress.failed(),
            elapsed: started.elapsed(),
        })
    }
}
