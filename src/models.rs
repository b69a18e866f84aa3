//! Core data models used throughout the pipeline.
//!
//! These types represent the notes, parsed records, chunks, and query
//! results that flow between the parser, the indexer, the vector store,
//! and the query pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A note file as found on disk during a scan.
#[derive(Debug, Clone)]
pub struct Note {
    /// Path relative to the notes directory, `/`-separated. Unique key.
    pub path: String,
    pub content: String,
    pub modified_at: DateTime<Utc>,
    /// SHA-256 hex of `content`.
    pub fingerprint: String,
}

/// Where a note's date was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    Metadata,
    Title,
    FileName,
    /// Fallback to the file modification date; not part of the content.
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionItem {
    pub task: String,
    pub due: Option<String>,
    pub done: bool,
}

/// Structured record of one meeting, derived deterministically from a [`Note`].
///
/// Most notes hold one meeting; a diary file yields one record per meeting.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNote {
    pub title: String,
    pub title_from_file_name: bool,
    pub date: Option<NaiveDate>,
    pub date_source: DateSource,
    pub attendees: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub body: String,
    /// Degradations met while parsing. Never fatal.
    pub warnings: Vec<String>,
}

impl ParsedNote {
    pub fn date_inferred(&self) -> bool {
        self.date_source == DateSource::Modified
    }

    pub fn date_label(&self) -> String {
        self.date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "undated".to_string())
    }
}

/// A non-fatal degradation met while reading or parsing one note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteWarning {
    pub path: String,
    pub reason: String,
}

impl NoteWarning {
    pub fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Stable identity of a chunk: the note path plus the chunk ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    pub note_path: String,
    pub ordinal: usize,
}

impl ChunkId {
    pub fn new(note_path: &str, ordinal: usize) -> Self {
        Self {
            note_path: note_path.to_string(),
            ordinal,
        }
    }

    /// Deterministic store key (UUIDv5 of `"{note_path}#{ordinal}"`).
    pub fn key(&self) -> String {
        let name = format!("{}#{}", self.note_path, self.ordinal);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
    }
}

/// Metadata stored next to every chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMetadata {
    pub note_path: String,
    pub fingerprint: String,
    pub ordinal: usize,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub date_inferred: bool,
    pub attendees: Vec<String>,
    /// The chunk's text mentions at least one of the note's action items.
    pub has_action_items: bool,
    /// The chunk's meeting has at least one unchecked action item.
    pub has_open_action_items: bool,
}

/// A contiguous span of a note body, sized for the embedding model.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Text handed to the embedding model: a short meeting header plus the body span.
    pub fn embedding_text(&self) -> String {
        let date = self
            .metadata
            .date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let mut header = format!("Meeting: {}", self.metadata.title);
        if !date.is_empty() {
            header.push_str(&format!(" ({})", date));
        }
        if !self.metadata.attendees.is_empty() {
            header.push_str(&format!("\nAttendees: {}", self.metadata.attendees.join(", ")));
        }
        format!("{}\n\n{}", header, self.text)
    }
}

/// A chunk together with its embedding vector, ready to be upserted.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub key: String,
    pub note_path: String,
    pub ordinal: usize,
    pub fingerprint: String,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub attendees: Vec<String>,
    pub has_action_items: bool,
    pub text: String,
    pub score: f32,
}

/// A note cited by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribution {
    pub note_path: String,
    pub title: String,
    pub date: Option<NaiveDate>,
}

/// Ephemeral result of one question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
    pub chunks: Vec<ScoredChunk>,
    pub attributions: Vec<Attribution>,
}
