pub mod cli;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod graph;
pub mod http;
pub mod logging;
pub mod models;
pub mod progress;
pub mod sink;
pub mod source;

pub use cli::run;
pub use config::IndexerConfig;
pub use engine::{BuildReport, Indexer};
pub use error::{ConfigError, SinkError, SourceError};
pub use models::{Sentence, SentenceId, SentenceTable};
pub use sink::{IndexSummary, Pipeline, Sink, SinkKind};
