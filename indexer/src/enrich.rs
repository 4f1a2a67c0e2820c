use tracing::info;

use crate::models::{SentenceTable, Transcription};
use crate::source::{AudioRecord, TranscriptionRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub applied: usize,
    pub unknown: usize,
}

/// Records who recorded audio for each sentence present in the table.
pub fn apply_audio<I>(table: &mut SentenceTable, records: I) -> EnrichStats
where
    I: IntoIterator<Item = AudioRecord>,
{
    let mut stats = EnrichStats::default();

    for record in records {
        match table.get_mut(record.id) {
            Some(sentence) => {
                sentence.audio_username = Some(record.username);
                stats.applied += 1;
            }
            None => stats.unknown += 1,
        }
    }

    info!(
        applied = stats.applied,
        unknown = stats.unknown,
        "audio owners added"
    );
    stats
}

/// Appends transcriptions in table order; a sentence may have one per script.
pub fn apply_transcriptions<I>(table: &mut SentenceTable, records: I) -> EnrichStats
where
    I: IntoIterator<Item = TranscriptionRecord>,
{
    let mut stats = EnrichStats::default();

    for record in records {
        let Some(sentence) = table.get_mut(record.id) else {
            stats.unknown += 1;
            continue;
        };

        sentence.transcriptions.push(Transcription {
            script_name: record.script_name,
            username: record.username,
            transcription: record.transcription,
        });
        stats.applied += 1;
    }

    info!(
        applied = stats.applied,
        unknown = stats.unknown,
        "transcriptions added"
    );
    stats
}
