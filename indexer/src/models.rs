use std::collections::{HashMap, HashSet};

use tatoeba_indexer_types::{SentenceDocument, TranscriptionDocument};

pub type SentenceId = u32;

/// A directed translation link as read from the link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    pub from: SentenceId,
    pub to: SentenceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub script_name: String,
    pub username: String,
    pub transcription: String,
}

// A sentence and everything derived for it. Relations hold neighbour IDs, never references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    pub id: SentenceId,
    pub language: String,
    pub content: String,
    pub username: String,
    pub added_at: String,
    pub updated_at: String,
    pub direct_relations: HashSet<SentenceId>,
    pub indirect_relations: HashSet<SentenceId>,
    pub translated_languages: HashSet<String>,
    pub audio_username: Option<String>,
    pub transcriptions: Vec<Transcription>,
}

impl Sentence {
    pub fn new(
        id: SentenceId,
        language: impl Into<String>,
        content: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            id,
            language: language.into(),
            content: content.into(),
            username: username.into(),
            ..Self::default()
        }
    }

    /// Builds the index document. Relations and languages are sorted so the output is reproducible.
    pub fn to_document(&self) -> SentenceDocument {
        let mut direct_translations: Vec<SentenceId> =
            self.direct_relations.iter().copied().collect();
        direct_translations.sort_unstable();

        let mut indirect_translations: Vec<SentenceId> =
            self.indirect_relations.iter().copied().collect();
        indirect_translations.sort_unstable();

        let mut translated_languages: Vec<String> =
            self.translated_languages.iter().cloned().collect();
        translated_languages.sort_unstable();

        SentenceDocument {
            id: self.id,
            language: self.language.clone(),
            content: self.content.clone(),
            username: self.username.clone(),
            added_at: self.added_at.clone(),
            updated_at: self.updated_at.clone(),
            direct_translations,
            indirect_translations,
            translated_languages,
            audio_username: self.audio_username.clone(),
            transcriptions: self
                .transcriptions
                .iter()
                .map(|t| TranscriptionDocument {
                    script_name: t.script_name.clone(),
                    username: t.username.clone(),
                    transcription: t.transcription.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SentenceTable {
    sentences: HashMap<SentenceId, Sentence>,
}

impl SentenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sentences: HashMap::with_capacity(capacity),
        }
    }

    /// Inserts a sentence, replacing any previous row with the same ID.
    pub fn insert(&mut self, sentence: Sentence) -> Option<Sentence> {
        self.sentences.insert(sentence.id, sentence)
    }

    pub fn get(&self, id: SentenceId) -> Option<&Sentence> {
        self.sentences.get(&id)
    }

    pub fn get_mut(&mut self, id: SentenceId) -> Option<&mut Sentence> {
        self.sentences.get_mut(&id)
    }

    pub fn contains(&self, id: SentenceId) -> bool {
        self.sentences.contains_key(&id)
    }

    pub fn language_of(&self, id: SentenceId) -> Option<&str> {
        self.sentences.get(&id).map(|s| s.language.as_str())
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sentence> {
        self.sentences.values()
    }

    pub(crate) fn as_map(&self) -> &HashMap<SentenceId, Sentence> {
        &self.sentences
    }

    pub fn sorted_ids(&self) -> Vec<SentenceId> {
        let mut ids: Vec<SentenceId> = self.sentences.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Documents in ascending ID order.
    pub fn documents(&self) -> impl Iterator<Item = SentenceDocument> + '_ {
        self.sorted_ids()
            .into_iter()
            .filter_map(move |id| self.sentences.get(&id).map(Sentence::to_document))
    }
}

impl FromIterator<Sentence> for SentenceTable {
    fn from_iter<I: IntoIterator<Item = Sentence>>(iter: I) -> Self {
        let mut table = SentenceTable::new();
        for sentence in iter {
            table.insert(sentence);
        }
        table
    }
}
