//! Core data models used throughout docent.
//!
//! These types represent the documents, chunks, index rows, settings and
//! chat records that flow through ingestion and question answering.

use serde::{Deserialize, Serialize};

/// An uploaded document as recorded in the authoritative store.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    /// Stored file name under the uploads directory.
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub chunk_count: i64,
    pub is_indexed: bool,
    pub created_at: i64,
}

/// Fields needed to register a new document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_size: i64,
}

/// A chunk of a document's extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_index: i64,
    pub content: String,
    /// Human-readable label, e.g. `Source: report.pdf, Chunk: 2`.
    pub metadata: String,
}

/// A chunk read back from the store, with its parent document id.
///
/// This is the unit of recovery: a full reindex consumes these in
/// document-creation order.
#[derive(Debug, Clone)]
pub struct SourceChunk {
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: String,
}

/// One row of the vector index: the record plus its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub record: EntryRecord,
    pub vector: Vec<f32>,
}

/// The persisted, non-vector half of an [`IndexEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: String,
}

/// Generation parameters; a single row mutated in place.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSettings {
    pub active_model: String,
    pub temperature: f64,
    pub context_length: i64,
    pub top_p: f64,
    pub top_k: i64,
    pub fallback_model: Option<String>,
    pub system_prompt: Option<String>,
}

/// Partial update for [`ModelSettings`]. `None` keeps the current value;
/// an empty string clears `fallback_model` / `system_prompt`.
#[derive(Debug, Clone, Default)]
pub struct ModelSettingsUpdate {
    pub active_model: Option<String>,
    pub temperature: Option<f64>,
    pub context_length: Option<i64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i64>,
    pub fallback_model: Option<String>,
    pub system_prompt: Option<String>,
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Documents,
    AiModel,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Documents => "documents",
            SourceType::AiModel => "ai_model",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "documents" => Some(SourceType::Documents),
            "ai_model" => Some(SourceType::AiModel),
            _ => None,
        }
    }
}

/// An answered question in the append-only chat log.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRecord {
    pub id: String,
    pub api_key_id: Option<String>,
    pub question: String,
    pub answer: String,
    pub source_type: String,
    /// Joined `metadata (Score: x.xx)` descriptors for document answers.
    pub source_documents: Option<String>,
    pub created_at: i64,
}
