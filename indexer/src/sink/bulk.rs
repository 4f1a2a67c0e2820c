use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::error::SinkError;

#[derive(Debug, Clone)]
pub struct BulkIndexerConfig {
    pub index: String,
    pub workers: usize,
    pub flush_bytes: usize,
    pub flush_interval: Duration,
}

/// One serialized document waiting to be sent.
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub document_id: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFailure {
    Rejected {
        status: u16,
        error_type: String,
        reason: String,
    },
    Request(String),
    MissingResult,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemFailure::Rejected {
                status,
                error_type,
                reason,
            } => write!(f, "{status} {error_type}: {reason}"),
            ItemFailure::Request(reason) => write!(f, "request failed: {reason}"),
            ItemFailure::MissingResult => f.write_str("no result returned for item"),
        }
    }
}

/// Receives the outcome of every item, from whichever worker flushed it.
pub trait BulkListener: Send + Sync {
    fn on_success(&self, document_id: &str);
    fn on_failure(&self, document_id: &str, failure: &ItemFailure);
}

pub trait BulkTransport: Send + Sync {
    fn bulk(&self, body: Vec<u8>) -> Result<BulkResponse, SinkError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkResponseItem {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub error: Option<BulkItemError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkItemError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
}

impl BulkResponseItem {
    fn outcome(&self) -> Result<(), ItemFailure> {
        match &self.error {
            None if (200..300).contains(&self.status) => Ok(()),
            Some(error) => Err(ItemFailure::Rejected {
                status: self.status,
                error_type: error.kind.clone(),
                reason: error.reason.clone(),
            }),
            None => Err(ItemFailure::Rejected {
                status: self.status,
                error_type: String::new(),
                reason: String::new(),
            }),
        }
    }
}

#[derive(Serialize)]
struct BulkAction<'a> {
    index: ActionMeta<'a>,
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    pub added: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub requests: usize,
}

#[derive(Default)]
struct Shared {
    added: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    requests: AtomicUsize,
    aborted: AtomicBool,
    fatal: Mutex<Option<SinkError>>,
}

impl Shared {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn abort(&self, err: SinkError) {
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if fatal.is_none() {
            *fatal = Some(err);
        }
        drop(fatal);
        self.aborted.store(true, Ordering::Release);
    }

    fn take_fatal(&self) -> Option<SinkError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn stats(&self) -> BulkStats {
        BulkStats {
            added: self.added.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// Accumulates documents into bulk requests sent by a fixed pool of worker threads.
///
/// Each worker flushes its buffer when the next item would push it past `flush_bytes`,
/// when `flush_interval` elapses, and on close. `add` blocks while the queue is full.
pub struct BulkIndexer {
    sender: Sender<BulkItem>,
    handles: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl BulkIndexer {
    pub fn new(
        config: BulkIndexerConfig,
        transport: Arc<dyn BulkTransport>,
        listener: Arc<dyn BulkListener>,
    ) -> Self {
        let worker_count = config.workers.max(1);
        let (sender, receiver) = bounded::<BulkItem>(worker_count.saturating_mul(2));
        let shared = Arc::new(Shared::default());
        let config = Arc::new(config);

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let worker = Worker {
                id,
                config: Arc::clone(&config),
                transport: Arc::clone(&transport),
                listener: Arc::clone(&listener),
                shared: Arc::clone(&shared),
            };
            let rx = receiver.clone();
            handles.push(std::thread::spawn(move || worker.run(rx)));
        }

        drop(receiver);

        Self {
            sender,
            handles,
            shared,
        }
    }

    pub fn add(&self, item: BulkItem) -> Result<(), SinkError> {
        if self.shared.is_aborted() {
            return Err(SinkError::Closed);
        }
        self.sender.send(item).map_err(|_| SinkError::Closed)?;
        self.shared.added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> BulkStats {
        self.shared.stats()
    }

    /// Adds every item, then closes. An item that could not be built stops the stream,
    /// and the indexer is still closed before that error is returned.
    pub fn drain<I>(self, items: I) -> Result<BulkStats, SinkError>
    where
        I: IntoIterator<Item = Result<BulkItem, SinkError>>,
    {
        let mut failed = None;
        for item in items {
            match item {
                Ok(item) => {
                    if self.add(item).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }

        let closed = self.close();
        match failed {
            Some(err) => Err(err),
            None => closed,
        }
    }

    /// Flushes what is left, waits for every worker and reports the first fatal error.
    pub fn close(self) -> Result<BulkStats, SinkError> {
        let BulkIndexer {
            sender,
            handles,
            shared,
        } = self;
        drop(sender);

        for handle in handles {
            if handle.join().is_err() {
                shared.abort(SinkError::WorkerPanicked);
            }
        }

        if let Some(err) = shared.take_fatal() {
            return Err(err);
        }
        if shared.is_aborted() {
            return Err(SinkError::Closed);
        }
        Ok(shared.stats())
    }
}

struct Worker {
    id: usize,
    config: Arc<BulkIndexerConfig>,
    transport: Arc<dyn BulkTransport>,
    listener: Arc<dyn BulkListener>,
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Buffer {
    body: Vec<u8>,
    ids: Vec<String>,
}

impl Buffer {
    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Worker {
    fn run(self, receiver: Receiver<BulkItem>) {
        let ticker = tick(self.config.flush_interval);
        let mut buffer = Buffer::default();

        loop {
            if self.shared.is_aborted() {
                return;
            }

            select! {
                recv(receiver) -> message => match message {
                    Ok(item) => {
                        if let Err(err) = self.push(&mut buffer, item) {
                            self.fail(err);
                            return;
                        }
                    }
                    Err(_) => {
                        if let Err(err) = self.flush(&mut buffer) {
                            self.fail(err);
                        }
                        return;
                    }
                },
                recv(ticker) -> _ => {
                    if let Err(err) = self.flush(&mut buffer) {
                        self.fail(err);
                        return;
                    }
                }
            }
        }
    }

    fn push(&self, buffer: &mut Buffer, item: BulkItem) -> Result<(), SinkError> {
        let mut entry = Vec::with_capacity(item.body.len() + 64);
        serde_json::to_writer(
            &mut entry,
            &BulkAction {
                index: ActionMeta {
                    index: &self.config.index,
                    id: &item.document_id,
                },
            },
        )
        .map_err(|source| SinkError::Encode {
            what: format!("bulk action for {}", item.document_id),
            source,
        })?;
        entry.push(b'\n');
        entry.extend_from_slice(&item.body);
        entry.push(b'\n');

        if !buffer.is_empty() && buffer.body.len() + entry.len() > self.config.flush_bytes {
            self.flush(buffer)?;
        }

        buffer.body.extend_from_slice(&entry);
        buffer.ids.push(item.document_id);
        Ok(())
    }

    fn flush(&self, buffer: &mut Buffer) -> Result<(), SinkError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let body = std::mem::take(&mut buffer.body);
        let ids = std::mem::take(&mut buffer.ids);
        trace!(
            worker = self.id,
            items = ids.len(),
            bytes = body.len(),
            "flushing bulk request"
        );
        self.shared.requests.fetch_add(1, Ordering::Relaxed);

        match self.transport.bulk(body) {
            Ok(response) if !response.errors => {
                for id in &ids {
                    self.succeed(id);
                }
                Ok(())
            }
            Ok(response) => {
                for (position, id) in ids.iter().enumerate() {
                    let outcome = response
                        .items
                        .get(position)
                        .and_then(|entry| entry.values().next())
                        .map(BulkResponseItem::outcome)
                        .unwrap_or(Err(ItemFailure::MissingResult));
                    match outcome {
                        Ok(()) => self.succeed(id),
                        Err(failure) => self.reject(id, &failure),
                    }
                }
                Ok(())
            }
            Err(err) => {
                let failure = ItemFailure::Request(err.to_string());
                for id in &ids {
                    self.reject(id, &failure);
                }
                if err.is_fatal() { Err(err) } else { Ok(()) }
            }
        }
    }

    fn succeed(&self, id: &str) {
        self.shared.succeeded.fetch_add(1, Ordering::Relaxed);
        self.listener.on_success(id);
    }

    fn reject(&self, id: &str, failure: &ItemFailure) {
        self.shared.failed.fetch_add(1, Ordering::Relaxed);
        self.listener.on_failure(id, failure);
    }

    fn fail(&self, err: SinkError) {
        error!(worker = self.id, error = %err, "bulk worker stopped");
        self.shared.abort(err);
        debug!(worker = self.id, "bulk indexer aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct FakeTransport {
        bodies: Mutex<Vec<String>>,
        fail_with: Option<fn() -> SinkError>,
    }

    impl FakeTransport {
        fn failing(fail_with: fn() -> SinkError) -> Self {
            Self {
                bodies: Mutex::new(Vec::new()),
                fail_with: Some(fail_with),
            }
        }

        fn requests(&self) -> Vec<String> {
            self.bodies.lock().expect("bodies").clone()
        }
    }

    impl BulkTransport for FakeTransport {
        fn bulk(&self, body: Vec<u8>) -> Result<BulkResponse, SinkError> {
            let body = String::from_utf8(body).expect("utf8 body");
            self.bodies.lock().expect("bodies").push(body.clone());
            if let Some(fail_with) = self.fail_with {
                return Err(fail_with());
            }

            let mut items = Vec::new();
            for action in body.lines().step_by(2) {
                let action: serde_json::Value = serde_json::from_str(action).expect("action");
                let id = action["index"]["_id"].as_str().expect("id").to_string();
                let item = if id.starts_with("bad") {
                    BulkResponseItem {
                        id: Some(id),
                        status: 400,
                        error: Some(BulkItemError {
                            kind: "mapper_parsing_exception".into(),
                            reason: "failed to parse".into(),
                        }),
                    }
                } else {
                    BulkResponseItem {
                        id: Some(id),
                        status: 201,
                        error: None,
                    }
                };
                items.push(HashMap::from([("index".to_string(), item)]));
            }
            let errors = items
                .iter()
                .flat_map(|entry| entry.values())
                .any(|item| item.error.is_some());
            Ok(BulkResponse { errors, items })
        }
    }

    #[derive(Default)]
    struct Recorder {
        succeeded: Mutex<Vec<String>>,
        failed: Mutex<Vec<(String, ItemFailure)>>,
    }

    impl BulkListener for Recorder {
        fn on_success(&self, document_id: &str) {
            self.succeeded
                .lock()
                .expect("succeeded")
                .push(document_id.to_string());
        }

        fn on_failure(&self, document_id: &str, failure: &ItemFailure) {
            self.failed
                .lock()
                .expect("failed")
                .push((document_id.to_string(), failure.clone()));
        }
    }

    fn config(workers: usize, flush_bytes: usize, flush_interval: Duration) -> BulkIndexerConfig {
        BulkIndexerConfig {
            index: "sentences".into(),
            workers,
            flush_bytes,
            flush_interval,
        }
    }

    fn item(id: &str) -> BulkItem {
        BulkItem {
            document_id: id.to_string(),
            body: format!(r#"{{"id":"{id}"}}"#).into_bytes(),
        }
    }

    #[test]
    fn writes_action_and_document_lines() {
        let transport = Arc::new(FakeTransport::default());
        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(1, 1_000_000, Duration::from_secs(60)),
            transport.clone(),
            recorder.clone(),
        );

        indexer.add(item("1")).expect("add");
        indexer.add(item("2")).expect("add");
        let stats = indexer.close().expect("close");

        assert_eq!(
            transport.requests(),
            vec![
                "{\"index\":{\"_index\":\"sentences\",\"_id\":\"1\"}}\n{\"id\":\"1\"}\n\
                 {\"index\":{\"_index\":\"sentences\",\"_id\":\"2\"}}\n{\"id\":\"2\"}\n"
                    .to_string()
            ]
        );
        assert_eq!(
            stats,
            BulkStats {
                added: 2,
                succeeded: 2,
                failed: 0,
                requests: 1
            }
        );
    }

    #[test]
    fn flushes_when_byte_threshold_is_reached() {
        let transport = Arc::new(FakeTransport::default());
        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(1, 1, Duration::from_secs(60)),
            transport.clone(),
            recorder.clone(),
        );

        for id in 0..5 {
            indexer.add(item(&id.to_string())).expect("add");
        }
        let stats = indexer.close().expect("close");

        assert_eq!(stats.requests, 5);
        assert_eq!(stats.succeeded, 5);
        assert!(transport.requests().iter().all(|body| body.lines().count() == 2));
    }

    #[test]
    fn flushes_when_interval_elapses() {
        let transport = Arc::new(FakeTransport::default());
        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(1, 1_000_000, Duration::from_millis(20)),
            transport.clone(),
            recorder.clone(),
        );

        for id in 0..3 {
            indexer.add(item(&id.to_string())).expect("add");
        }
        let mut waited = Duration::ZERO;
        while transport.requests().is_empty() && waited < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }

        assert!(!transport.requests().is_empty());
        assert_eq!(indexer.stats().added, 3);
        let stats = indexer.close().expect("close");
        assert_eq!(stats.succeeded, 3);
    }

    #[test]
    fn rejected_items_are_reported_and_the_rest_continue() {
        let transport = Arc::new(FakeTransport::default());
        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(2, 200, Duration::from_secs(60)),
            transport.clone(),
            recorder.clone(),
        );

        for id in ["1", "bad-2", "3", "bad-4", "5", "6"] {
            indexer.add(item(id)).expect("add");
        }
        let stats = indexer.close().expect("close");

        assert_eq!(stats.succeeded, 4);
        assert_eq!(stats.failed, 2);

        let mut failed: Vec<String> = recorder
            .failed
            .lock()
            .expect("failed")
            .iter()
            .map(|(id, failure)| {
                assert!(matches!(
                    failure,
                    ItemFailure::Rejected { status: 400, error_type, .. }
                        if error_type == "mapper_parsing_exception"
                ));
                id.clone()
            })
            .collect();
        failed.sort();
        assert_eq!(failed, vec!["bad-2".to_string(), "bad-4".to_string()]);
    }

    #[test]
    fn many_workers_deliver_every_item_once() {
        let transport = Arc::new(FakeTransport::default());
        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(4, 512, Duration::from_millis(5)),
            transport.clone(),
            recorder.clone(),
        );

        for id in 0..1_000 {
            indexer.add(item(&id.to_string())).expect("add");
        }
        let stats = indexer.close().expect("close");

        assert_eq!(stats.added, 1_000);
        assert_eq!(stats.succeeded, 1_000);
        let mut delivered = recorder.succeeded.lock().expect("succeeded").clone();
        delivered.sort();
        delivered.dedup();
        assert_eq!(delivered.len(), 1_000);
    }

    #[test]
    fn rejected_request_fails_its_items_only() {
        let transport = Arc::new(FakeTransport::failing(|| SinkError::Request {
            url: "http://localhost:9200/_bulk".into(),
            status: 413,
            message: "too large".into(),
        }));
        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(1, 1_000_000, Duration::from_secs(60)),
            transport.clone(),
            recorder.clone(),
        );

        indexer.add(item("1")).expect("add");
        indexer.add(item("2")).expect("add");
        let stats = indexer.close().expect("close");

        assert_eq!(stats.failed, 2);
        assert!(matches!(
            recorder.failed.lock().expect("failed")[0].1,
            ItemFailure::Request(_)
        ));
    }

    #[test]
    fn exhausted_retries_abort_the_stream() {
        let transport = Arc::new(FakeTransport::failing(|| SinkError::Transient {
            url: "http://localhost:9200/_bulk".into(),
            attempts: 6,
            reason: "status 503".into(),
        }));
        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(1, 1, Duration::from_secs(60)),
            transport.clone(),
            recorder.clone(),
        );

        for id in 0..50 {
            if indexer.add(item(&id.to_string())).is_err() {
                break;
            }
        }
        let err = indexer.close().expect_err("should fail");
        assert!(matches!(err, SinkError::Transient { attempts: 6, .. }));
    }

    struct GatedTransport {
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl BulkTransport for GatedTransport {
        fn bulk(&self, body: Vec<u8>) -> Result<BulkResponse, SinkError> {
            let _ = self.entered.send(());
            // Returns once the test releases the gate by dropping its sender.
            let _ = self.gate.recv();
            let lines = body
                .split(|byte| *byte == b'\n')
                .filter(|line| !line.is_empty())
                .count();
            Ok(BulkResponse {
                errors: false,
                items: vec![HashMap::new(); lines / 2],
            })
        }
    }

    #[test]
    fn add_blocks_while_workers_are_stalled() {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release, gate) = bounded::<()>(0);
        let transport = Arc::new(GatedTransport {
            entered: entered_tx,
            gate,
        });
        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(1, 1, Duration::from_secs(60)),
            transport,
            recorder.clone(),
        );

        std::thread::scope(|scope| {
            let producer = scope.spawn(|| {
                for id in 0..10 {
                    indexer.add(item(&id.to_string())).expect("add");
                }
            });

            entered_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("first flush started");
            std::thread::sleep(Duration::from_millis(100));

            // One item in flight, one buffered by the worker, two queued.
            assert_eq!(indexer.stats().added, 4);
            assert!(!producer.is_finished());

            drop(release);
            producer.join().expect("producer");
        });

        let stats = indexer.close().expect("close");
        assert_eq!(stats.added, 10);
        assert_eq!(stats.succeeded, 10);
    }

    #[test]
    fn clean_response_skips_item_inspection() {
        struct Clean;

        impl BulkTransport for Clean {
            fn bulk(&self, _body: Vec<u8>) -> Result<BulkResponse, SinkError> {
                Ok(BulkResponse::default())
            }
        }

        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(1, 1_000_000, Duration::from_secs(60)),
            Arc::new(Clean),
            recorder.clone(),
        );
        indexer.add(item("1")).expect("add");
        indexer.add(item("2")).expect("add");
        let stats = indexer.close().expect("close");

        assert_eq!(stats.succeeded, 2);
        assert!(recorder.failed.lock().expect("failed").is_empty());
    }

    #[test]
    fn drain_closes_before_reporting_a_bad_item() {
        let transport = Arc::new(FakeTransport::default());
        let recorder = Arc::new(Recorder::default());
        let indexer = BulkIndexer::new(
            config(2, 1_000_000, Duration::from_secs(60)),
            transport.clone(),
            recorder.clone(),
        );

        let items = vec![
            Ok(item("1")),
            Ok(item("2")),
            Err(SinkError::Closed),
            Ok(item("3")),
        ];
        let err = indexer.drain(items).expect_err("should fail");

        assert!(matches!(err, SinkError::Closed));
        let mut delivered = recorder.succeeded.lock().expect("succeeded").clone();
        delivered.sort();
        assert_eq!(delivered, vec!["1".to_string(), "2".to_string()]);
        assert!(!transport.requests().is_empty());
    }

    #[test]
    fn first_fatal_error_survives_a_poisoned_lock() {
        let shared = Arc::new(Shared::default());
        let poisoner = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.fatal.lock().expect("lock");
            panic!("poison the lock");
        })
        .join();
        assert!(shared.fatal.is_poisoned());

        shared.abort(SinkError::WorkerPanicked);
        shared.abort(SinkError::Closed);

        assert!(shared.is_aborted());
        assert!(matches!(shared.take_fatal(), Some(SinkError::WorkerPanicked)));
    }
}
