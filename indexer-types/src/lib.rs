use serde::{Deserialize, Serialize};

/// A sentence as it is stored in the destination search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceDocument {
    pub id: u32,
    pub language: String,
    pub content: String,
    pub username: String,
    pub added_at: String,
    pub updated_at: String,
    pub direct_translations: Vec<u32>,
    pub indirect_translations: Vec<u32>,
    pub translated_languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_username: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transcriptions: Vec<TranscriptionDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionDocument {
    pub script_name: String,
    pub username: String,
    pub transcription: String,
}

impl SentenceDocument {
    /// Identifier used as the document key in the destination index.
    pub fn document_id(&self) -> String {
        self.id.to_string()
    }
}
