//! Synchronous-batch sink: documents are submitted in fixed-size batches and every
//! batch is followed by polling the engine's task endpoint until it settles.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tatoeba_indexer_types::SentenceDocument;
use tracing::{debug, info, warn};

use crate::credentials::ApiKey;
use crate::error::SinkError;
use crate::http::{AuthScheme, HttpClient, Payload, parse_json};
use crate::models::SentenceTable;
use crate::progress::Progress;
use crate::sink::Sink;
use crate::sink::retry::RetryPolicy;

pub const PRIMARY_KEY: &str = "id";
pub const SEARCHABLE_ATTRIBUTES: [&str; 4] = ["id", "language", "content", "username"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enqueued,
    Processing,
    #[serde(alias = "processed")]
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    fn is_pending(self) -> bool {
        matches!(
            self,
            TaskStatus::Enqueued | TaskStatus::Processing | TaskStatus::Unknown
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskInfo {
    pub status: TaskStatus,
    #[serde(default)]
    pub error: Option<TaskError>,
}

impl TaskInfo {
    fn failure_reason(&self) -> String {
        match &self.error {
            Some(TaskError {
                code: Some(code),
                message,
            }) => format!("{code}: {message}"),
            Some(TaskError {
                code: None,
                message,
            }) => message.clone(),
            None => format!("task ended as {:?}", self.status),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct EnqueuedTask {
    #[serde(rename = "taskUid", alias = "updateId", alias = "uid")]
    task_uid: u64,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    uid: &'a str,
    #[serde(rename = "primaryKey")]
    primary_key: &'a str,
}

/// The subset of the engine's HTTP API the sink needs.
pub trait MeiliApi: Send {
    fn health(&self) -> Result<(), SinkError>;
    fn index_exists(&self, uid: &str) -> Result<bool, SinkError>;
    fn create_index(&self, uid: &str, primary_key: &str) -> Result<u64, SinkError>;
    fn update_searchable_attributes(&self, uid: &str, attributes: &[&str])
    -> Result<u64, SinkError>;
    fn add_or_replace_documents(
        &self,
        uid: &str,
        documents: &[SentenceDocument],
    ) -> Result<u64, SinkError>;
    fn task_status(&self, task: u64) -> Result<TaskInfo, SinkError>;
}

#[derive(Debug, Clone)]
pub struct HttpMeiliClient {
    http: HttpClient,
}

impl HttpMeiliClient {
    pub fn new(
        host: &str,
        timeout: Duration,
        api_key: Option<&ApiKey>,
        retry: RetryPolicy,
    ) -> Result<Self, SinkError> {
        let credential = api_key.map(|key| (AuthScheme::Bearer, key));
        Ok(Self {
            http: HttpClient::new(host, timeout, credential, retry)?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }
}

impl MeiliApi for HttpMeiliClient {
    fn health(&self) -> Result<(), SinkError> {
        self.http
            .send_once(Method::GET, "/health")?
            .ensure_success()
            .map(|_| ())
    }

    fn index_exists(&self, uid: &str) -> Result<bool, SinkError> {
        let response = self.http.send(Method::GET, &format!("/indexes/{uid}"), None)?;
        if response.status == 404 {
            return Ok(false);
        }
        response.ensure_success().map(|_| true)
    }

    fn create_index(&self, uid: &str, primary_key: &str) -> Result<u64, SinkError> {
        let payload = Payload::json(&CreateIndexRequest { uid, primary_key }, "index creation")?;
        let task: EnqueuedTask =
            parse_json(self.http.send(Method::POST, "/indexes", Some(payload))?)?;
        Ok(task.task_uid)
    }

    fn update_searchable_attributes(
        &self,
        uid: &str,
        attributes: &[&str],
    ) -> Result<u64, SinkError> {
        let payload = Payload::json(attributes, "searchable attributes")?;
        let path = format!("/indexes/{uid}/settings/searchable-attributes");
        let task: EnqueuedTask = parse_json(self.http.send(Method::PUT, &path, Some(payload))?)?;
        Ok(task.task_uid)
    }

    fn add_or_replace_documents(
        &self,
        uid: &str,
        documents: &[SentenceDocument],
    ) -> Result<u64, SinkError> {
        let payload = Payload::json(documents, "document batch")?;
        let path = format!("/indexes/{uid}/documents?primaryKey={PRIMARY_KEY}");
        let task: EnqueuedTask = parse_json(self.http.send(Method::POST, &path, Some(payload))?)?;
        Ok(task.task_uid)
    }

    fn task_status(&self, task: u64) -> Result<TaskInfo, SinkError> {
        parse_json(self.http.send(Method::GET, &format!("/tasks/{task}"), None)?)
    }
}

#[derive(Debug, Clone)]
pub struct MeiliSettings {
    pub index: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub max_task_wait: Duration,
    pub health_check: bool,
}

pub struct MeilisearchSink<A: MeiliApi = HttpMeiliClient> {
    api: A,
    settings: MeiliSettings,
    initialized: bool,
}

impl<A: MeiliApi> MeilisearchSink<A> {
    pub fn new(api: A, settings: MeiliSettings) -> Self {
        Self {
            api,
            settings,
            initialized: false,
        }
    }

    /// Polls `task` every `poll_interval` until it succeeds, fails or exceeds `max_task_wait`.
    fn wait_for_task(&self, task: u64) -> Result<(), SinkError> {
        let started = Instant::now();
        loop {
            thread::sleep(self.settings.poll_interval);

            let info = self.api.task_status(task)?;
            if !info.status.is_pending() {
                return match info.status {
                    TaskStatus::Succeeded => Ok(()),
                    _ => Err(SinkError::TaskFailed {
                        task,
                        reason: info.failure_reason(),
                    }),
                };
            }

            let waited = started.elapsed();
            if waited >= self.settings.max_task_wait {
                return Err(SinkError::TaskTimeout { task, waited });
            }
            debug!(task, status = ?info.status, "task still pending");
        }
    }

    fn probe(&self, batch: usize) -> Result<(), SinkError> {
        if !self.settings.health_check {
            return Ok(());
        }
        self.api.health().map_err(|err| SinkError::Unhealthy {
            batch,
            reason: err.to_string(),
        })
    }
}

impl<A: MeiliApi> Sink for MeilisearchSink<A> {
    fn name(&self) -> &'static str {
        "meilisearch"
    }

    fn initialize(&mut self) -> Result<(), SinkError> {
        let index = self.settings.index.as_str();
        if self.settings.health_check {
            self.api.health()?;
        }

        if !self.api.index_exists(index)? {
            info!(index, "creating index");
            let task = self.api.create_index(index, PRIMARY_KEY)?;
            self.wait_for_task(task)?;
        }

        let task = self
            .api
            .update_searchable_attributes(index, &SEARCHABLE_ATTRIBUTES)?;
        self.wait_for_task(task)?;

        self.initialized = true;
        Ok(())
    }

    fn index(&mut self, table: &SentenceTable, progress: Arc<Progress>) -> Result<(), SinkError> {
        if !self.initialized {
            return Err(SinkError::NotInitialized);
        }

        let ids = table.sorted_ids();
        let batch_size = self.settings.batch_size.max(1);

        for (batch, chunk) in ids.chunks(batch_size).enumerate() {
            self.probe(batch)?;

            let documents: Vec<SentenceDocument> = chunk
                .iter()
                .filter_map(|id| table.get(*id))
                .map(|sentence| sentence.to_document())
                .collect();

            let outcome = self
                .api
                .add_or_replace_documents(&self.settings.index, &documents)
                .and_then(|task| self.wait_for_task(task));

            match outcome {
                Ok(()) => progress.record_indexed(documents.len()),
                Err(err) if !err.is_fatal() => {
                    warn!(batch, documents = documents.len(), error = %err, "batch was not indexed");
                    progress.record_failed(documents.len());
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }
}
