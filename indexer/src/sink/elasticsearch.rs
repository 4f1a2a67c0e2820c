use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tracing::{info, warn};

use crate::credentials::ApiKey;
use crate::error::SinkError;
use crate::http::{AuthScheme, HttpClient, Payload, parse_json};
use crate::models::SentenceTable;
use crate::progress::Progress;
use crate::sink::Sink;
use crate::sink::bulk::{
    BulkIndexer, BulkIndexerConfig, BulkItem, BulkListener, BulkResponse, BulkTransport,
    ItemFailure,
};
use crate::sink::retry::RetryPolicy;

pub trait ElasticsearchApi: BulkTransport {
    fn ping(&self) -> Result<(), SinkError>;
    /// Deletes the index. A missing index is not an error.
    fn delete_index(&self, index: &str) -> Result<(), SinkError>;
    fn create_index(&self, index: &str) -> Result<(), SinkError>;
}

#[derive(Debug, Clone)]
pub struct HttpElasticsearchClient {
    http: HttpClient,
}

impl HttpElasticsearchClient {
    pub fn new(
        host: &str,
        timeout: Duration,
        api_key: Option<&ApiKey>,
        retry: RetryPolicy,
    ) -> Result<Self, SinkError> {
        let credential = api_key.map(|key| (AuthScheme::ApiKey, key));
        Ok(Self {
            http: HttpClient::new(host, timeout, credential, retry)?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }
}

impl BulkTransport for HttpElasticsearchClient {
    fn bulk(&self, body: Vec<u8>) -> Result<BulkResponse, SinkError> {
        parse_json(
            self.http
                .send(Method::POST, "/_bulk", Some(Payload::ndjson(body)))?,
        )
    }
}

impl ElasticsearchApi for HttpElasticsearchClient {
    fn ping(&self) -> Result<(), SinkError> {
        self.http
            .send_once(Method::GET, "/")?
            .ensure_success()
            .map(|_| ())
    }

    fn delete_index(&self, index: &str) -> Result<(), SinkError> {
        let response = self.http.send(Method::DELETE, &format!("/{index}"), None)?;
        if response.status == 404 {
            return Ok(());
        }
        response.ensure_success().map(|_| ())
    }

    fn create_index(&self, index: &str) -> Result<(), SinkError> {
        self.http
            .send(Method::PUT, &format!("/{index}"), None)?
            .ensure_success()
            .map(|_| ())
    }
}

/// Feeds per-item bulk outcomes into the shared progress counters.
struct ProgressListener {
    progress: Arc<Progress>,
}

impl BulkListener for ProgressListener {
    fn on_success(&self, _document_id: &str) {
        self.progress.record_indexed(1);
    }

    fn on_failure(&self, document_id: &str, failure: &ItemFailure) {
        warn!(document = document_id, error = %failure, "document was not indexed");
        self.progress.record_failed(1);
    }
}

#[derive(Debug, Clone)]
pub struct ElasticsearchSettings {
    pub index: String,
    pub workers: usize,
    pub flush_bytes: usize,
    pub flush_interval: Duration,
}

pub struct ElasticsearchSink<A: ElasticsearchApi + 'static = HttpElasticsearchClient> {
    api: Arc<A>,
    settings: ElasticsearchSettings,
    initialized: bool,
}

impl<A: ElasticsearchApi + 'static> ElasticsearchSink<A> {
    pub fn new(api: A, settings: ElasticsearchSettings) -> Self {
        Self {
            api: Arc::new(api),
            settings,
            initialized: false,
        }
    }
}

impl<A: ElasticsearchApi + 'static> Sink for ElasticsearchSink<A> {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    /// Recreates the index from scratch.
    fn initialize(&mut self) -> Result<(), SinkError> {
        let index = self.settings.index.as_str();
        self.api.ping()?;
        self.api.delete_index(index)?;
        self.api.create_index(index)?;
        info!(index, "index recreated");
        self.initialized = true;
        Ok(())
    }

    fn index(&mut self, table: &SentenceTable, progress: Arc<Progress>) -> Result<(), SinkError> {
        if !self.initialized {
            return Err(SinkError::NotInitialized);
        }

        let transport: Arc<dyn BulkTransport> = self.api.clone();
        let indexer = BulkIndexer::new(
            BulkIndexerConfig {
                index: self.settings.index.clone(),
                workers: self.settings.workers,
                flush_bytes: self.settings.flush_bytes,
                flush_interval: self.settings.flush_interval,
            },
            transport,
            Arc::new(ProgressListener { progress }),
        );

        let items = table.documents().map(|document| {
            let body = serde_json::to_vec(&document).map_err(|source| SinkError::Encode {
                what: format!("sentence {}", document.id),
                source,
            })?;
            Ok(BulkItem {
                document_id: document.document_id(),
                body,
            })
        });

        let stats = indexer.drain(items)?;
        info!(
            requests = stats.requests,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "bulk indexer closed"
        );
        Ok(())
    }
}
