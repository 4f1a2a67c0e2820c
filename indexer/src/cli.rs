use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{info, warn};

use crate::config::{IndexerConfig, RawConfig};
use crate::credentials;
use crate::engine::Indexer;
use crate::logging;
use crate::sink::{self, Pipeline, SinkKind};
use crate::source::SourceFiles;

#[derive(Debug, Parser)]
#[command(
    name = "tatoeba-indexer",
    version,
    about = "Index the Tatoeba sentence corpus into a search engine"
)]
pub struct Cli {
    /// Search engine to index into.
    #[arg(long, value_enum, env = "TATOEBA_INDEXER_SINK")]
    pub sink: Option<SinkKind>,
    /// Engine address; `http://` is added when no scheme is given.
    #[arg(long, env = "TATOEBA_INDEXER_HOST")]
    pub host: Option<String>,
    /// Name of the index to fill.
    #[arg(long, env = "TATOEBA_INDEXER_INDEX")]
    pub index: Option<String>,
    /// Directory containing the exported corpus tables.
    #[arg(long, env = "TATOEBA_INDEXER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
    /// Prompt for the engine API key unless TATOEBA_INDEXER_API_KEY is set.
    #[arg(long)]
    pub api_key: bool,
    /// Documents per batch for the batch sink.
    #[arg(long, env = "TATOEBA_INDEXER_BATCH_SIZE")]
    pub batch_size: Option<usize>,
    /// Bulk workers for the streaming sink.
    #[arg(long, env = "TATOEBA_INDEXER_WORKERS")]
    pub workers: Option<usize>,
    /// Flush a bulk buffer once it reaches this many bytes.
    #[arg(long, env = "TATOEBA_INDEXER_FLUSH_BYTES")]
    pub flush_bytes: Option<usize>,
    /// Flush non-empty bulk buffers this often, e.g. `30s`.
    #[arg(long, env = "TATOEBA_INDEXER_FLUSH_INTERVAL")]
    pub flush_interval: Option<String>,
    /// Delay between task status polls, e.g. `2s`.
    #[arg(long, env = "TATOEBA_INDEXER_POLL_INTERVAL")]
    pub poll_interval: Option<String>,
    /// Give up on a task that has not settled after this long, e.g. `10m`.
    #[arg(long, env = "TATOEBA_INDEXER_MAX_TASK_WAIT")]
    pub max_task_wait: Option<String>,
    /// Retries for rate-limited or unavailable responses.
    #[arg(long, env = "TATOEBA_INDEXER_MAX_RETRIES")]
    pub max_retries: Option<u32>,
    /// Timeout for a single HTTP request, e.g. `60s`.
    #[arg(long, env = "TATOEBA_INDEXER_REQUEST_TIMEOUT")]
    pub request_timeout: Option<String>,
    /// Do not probe engine health before each batch.
    #[arg(long)]
    pub skip_health_check: bool,
    /// TOML file with the same settings; command-line values take precedence.
    #[arg(long, env = "TATOEBA_INDEXER_CONFIG")]
    pub config: Option<PathBuf>,
    /// Increase logging verbosity (use -vv for trace level).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    fn overrides(&self) -> RawConfig {
        RawConfig {
            sink: self.sink,
            host: self.host.clone(),
            index: self.index.clone(),
            data_dir: self.data_dir.clone(),
            batch_size: self.batch_size,
            workers: self.workers,
            flush_bytes: self.flush_bytes,
            flush_interval: self.flush_interval.clone(),
            poll_interval: self.poll_interval.clone(),
            max_task_wait: self.max_task_wait.clone(),
            max_retries: self.max_retries,
            request_timeout: self.request_timeout.clone(),
            health_check: self.skip_health_check.then_some(false),
        }
    }

    pub fn resolve_config(&self) -> Result<IndexerConfig> {
        let file = match &self.config {
            Some(path) => RawConfig::load(path)?,
            None => RawConfig::default(),
        };
        IndexerConfig::from_raw(file.merge(self.overrides())).context("invalid configuration")
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose)?;

    let config = cli.resolve_config()?;
    let indexer = Indexer::new(SourceFiles::in_dir(&config.data_dir));
    indexer
        .files()
        .ensure_exist()
        .context("corpus tables are incomplete")?;

    let api_key = credentials::resolve_api_key(cli.api_key)?;
    let sink = sink::build_sink(&config, api_key.as_ref())
        .with_context(|| format!("failed to set up the {} sink", config.sink))?;

    let mut pipeline = Pipeline::new(sink);
    pipeline
        .initialize()
        .with_context(|| format!("failed to prepare index '{}'", config.index_name))?;

    let (table, report) = indexer
        .build()
        .with_context(|| format!("failed to read corpus from {}", config.data_dir.display()))?;

    let summary = pipeline.run(&table).context("indexing aborted")?;

    if summary.failed > 0 {
        warn!(failed = summary.failed, "some documents were not indexed");
    }
    info!(
        sink = summary.sink,
        index = config.index_name,
        indexed = summary.indexed,
        failed = summary.failed,
        total = summary.total,
        skipped_rows = report.skipped_rows(),
        elapsed = ?summary.elapsed,
        "indexing complete"
    );

    Ok(())
}
