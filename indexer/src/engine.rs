use std::time::{Duration, Instant};

use tracing::{Level, info, warn};

use crate::enrich::{self, EnrichStats};
use crate::error::SourceError;
use crate::graph::{self, IndirectStats, LinkStats};
use crate::models::SentenceTable;
use crate::source::{self, SourceFiles, TableStats};

const MAX_REPORTED_VIOLATIONS: usize = 10;

/// What happened to each table while building the in-memory corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub sentences: TableStats,
    pub links: TableStats,
    pub link_stats: LinkStats,
    pub indirect: IndirectStats,
    pub audio: TableStats,
    pub audio_stats: EnrichStats,
    pub transcriptions: TableStats,
    pub transcription_stats: EnrichStats,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn skipped_rows(&self) -> usize {
        self.sentences.skipped + self.links.skipped + self.audio.skipped + self.transcriptions.skipped
    }
}

/// Builds the sentence table from the exported corpus tables.
pub struct Indexer {
    files: SourceFiles,
}

impl Indexer {
    pub fn new(files: SourceFiles) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &SourceFiles {
        &self.files
    }

    /// Parses sentences, applies links, resolves indirect translations, then adds
    /// audio owners and transcriptions. Every table must exist before parsing starts.
    pub fn build(&self) -> Result<(SentenceTable, BuildReport), SourceError> {
        self.files.ensure_exist()?;
        let started = Instant::now();
        let mut report = BuildReport::default();

        let (mut table, stats) = source::parse_sentences(&self.files.sentences)?;
        report.sentences = stats;

        let (links, stats) = source::read_links(&self.files.links)?;
        report.links = stats;
        report.link_stats = graph::apply_links(&mut table, links);
        report.indirect = graph::resolve_indirect(&mut table);

        let (audio, stats) = source::read_audio(&self.files.audio)?;
        report.audio = stats;
        report.audio_stats = enrich::apply_audio(&mut table, audio);

        let (transcriptions, stats) = source::read_transcriptions(&self.files.transcriptions)?;
        report.transcriptions = stats;
        report.transcription_stats = enrich::apply_transcriptions(&mut table, transcriptions);

        if tracing::enabled!(Level::DEBUG) {
            let violations = graph::check_invariants(&table);
            for violation in violations.iter().take(MAX_REPORTED_VIOLATIONS) {
                warn!(?violation, "relation invariant does not hold");
            }
        }

        report.elapsed = started.elapsed();
        info!(
            sentences = table.len(),
            skipped_rows = report.skipped_rows(),
            elapsed = ?report.elapsed,
            "sentence table built"
        );
        Ok((table, report))
    }
}
