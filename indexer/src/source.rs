use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::SourceError;
use crate::models::{Link, Sentence, SentenceId, SentenceTable};

pub const SENTENCES_FILE: &str = "sentences_detailed.csv";
pub const LINKS_FILE: &str = "links.csv";
pub const AUDIO_FILE: &str = "sentences_with_audio.csv";
pub const TRANSCRIPTIONS_FILE: &str = "transcriptions.csv";

const NULL_VALUE: &str = "\\N";
const ZERO_TIMESTAMP: &str = "0000-00-00 00:00:00";
const MIN_LANGUAGE_LEN: usize = 3;

/// Locations of the four tab-delimited tables the corpus is exported as.
#[derive(Debug, Clone)]
pub struct SourceFiles {
    pub sentences: PathBuf,
    pub links: PathBuf,
    pub audio: PathBuf,
    pub transcriptions: PathBuf,
}

impl SourceFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            sentences: dir.join(SENTENCES_FILE),
            links: dir.join(LINKS_FILE),
            audio: dir.join(AUDIO_FILE),
            transcriptions: dir.join(TRANSCRIPTIONS_FILE),
        }
    }

    /// Fails on the first table that is missing, before anything is parsed.
    pub fn ensure_exist(&self) -> Result<(), SourceError> {
        for path in [
            &self.sentences,
            &self.links,
            &self.audio,
            &self.transcriptions,
        ] {
            if !path.is_file() {
                return Err(SourceError::Missing { path: path.clone() });
            }
        }
        Ok(())
    }
}

/// Row counts for one table: rows read, rows kept and rows dropped as malformed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub rows: usize,
    pub applied: usize,
    pub skipped: usize,
}

impl TableStats {
    fn record(&mut self, applied: bool) {
        self.rows += 1;
        if applied {
            self.applied += 1;
        } else {
            self.skipped += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRecord {
    pub id: SentenceId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionRecord {
    pub id: SentenceId,
    pub script_name: String,
    pub username: String,
    pub transcription: String,
}

pub fn parse_sentences(path: &Path) -> Result<(SentenceTable, TableStats), SourceError> {
    let mut table = SentenceTable::new();
    let mut stats = TableStats::default();

    for_each_row(path, |columns| {
        let sentence = sentence_from_row(columns);
        if sentence.is_none() {
            debug!(row = stats.rows + 1, "skipping malformed sentence row");
        }
        stats.record(sentence.is_some());
        if let Some(sentence) = sentence {
            table.insert(sentence);
        }
    })?;

    log_stats("sentences", path, &stats);
    Ok((table, stats))
}

pub fn read_links(path: &Path) -> Result<(Vec<Link>, TableStats), SourceError> {
    let mut links = Vec::new();
    let mut stats = TableStats::default();

    for_each_row(path, |columns| {
        let link = match columns {
            [from, to, ..] => parse_id(from)
                .zip(parse_id(to))
                .map(|(from, to)| Link { from, to }),
            _ => None,
        };
        stats.record(link.is_some());
        links.extend(link);
    })?;

    log_stats("links", path, &stats);
    Ok((links, stats))
}

pub fn read_audio(path: &Path) -> Result<(Vec<AudioRecord>, TableStats), SourceError> {
    let mut records = Vec::new();
    let mut stats = TableStats::default();

    for_each_row(path, |columns| {
        let record = match columns {
            [id, username, ..] => parse_id(id).map(|id| AudioRecord {
                id,
                username: normalize(username),
            }),
            _ => None,
        };
        stats.record(record.is_some());
        records.extend(record);
    })?;

    log_stats("audio", path, &stats);
    Ok((records, stats))
}

pub fn read_transcriptions(
    path: &Path,
) -> Result<(Vec<TranscriptionRecord>, TableStats), SourceError> {
    let mut records = Vec::new();
    let mut stats = TableStats::default();

    for_each_row(path, |columns| {
        let record = match columns {
            [id, _, script_name, username, transcription, ..] => {
                parse_id(id).map(|id| TranscriptionRecord {
                    id,
                    script_name: normalize(script_name),
                    username: normalize(username),
                    transcription: normalize(transcription),
                })
            }
            _ => None,
        };
        stats.record(record.is_some());
        records.extend(record);
    })?;

    log_stats("transcriptions", path, &stats);
    Ok((records, stats))
}

fn sentence_from_row(columns: &[&str]) -> Option<Sentence> {
    let (id, language, content) = match columns {
        [id, language, content, ..] => (*id, *language, *content),
        _ => return None,
    };

    if language.chars().count() < MIN_LANGUAGE_LEN {
        return None;
    }

    let id = parse_id(id)?;
    let column = |index: usize| columns.get(index).map(|v| normalize(v)).unwrap_or_default();

    let mut sentence = Sentence::new(id, language, normalize(content), column(3));
    sentence.added_at = column(4);
    sentence.updated_at = column(5);
    Some(sentence)
}

fn parse_id(raw: &str) -> Option<SentenceId> {
    raw.trim().parse().ok()
}

/// Maps the export's null sentinels to an empty string.
pub fn normalize(value: &str) -> String {
    if value == NULL_VALUE || value == ZERO_TIMESTAMP {
        String::new()
    } else {
        value.to_string()
    }
}

fn for_each_row<F>(path: &Path, mut handle: F) -> Result<(), SourceError>
where
    F: FnMut(&[&str]),
{
    if !path.exists() {
        return Err(SourceError::Missing {
            path: path.to_path_buf(),
        });
    }

    let io_error = |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_error)?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).map_err(io_error)?;
        if read == 0 {
            break;
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\n', '\r']);
        if text.is_empty() {
            continue;
        }

        let columns: Vec<&str> = text.split('\t').collect();
        handle(&columns);
    }

    Ok(())
}

fn log_stats(table: &str, path: &Path, stats: &TableStats) {
    info!(
        table,
        path = %path.display(),
        rows = stats.rows,
        applied = stats.applied,
        skipped = stats.skipped,
        "source table read"
    );
}
