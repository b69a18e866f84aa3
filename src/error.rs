//! Error taxonomy for the indexing and query pipelines.
//!
//! Every fatal condition surfaces as a distinct [`NotesError`] variant that
//! names the offending note path, endpoint, or configuration key. Parse
//! problems are never fatal: they are reported as
//! [`NotesError::ParseDegraded`] warnings and parsing continues.
//!
//! | Variant | Scope |
//! |---------|-------|
//! | `ParseDegraded` | non-fatal, logged per note |
//! | `EmbeddingUnavailable` | fails the current delta batch, retried next run |
//! | `StoreUnreachable` | aborts the run before any mutation |
//! | `DimensionMismatch` | configuration error, aborts at startup |
//! | `LlmUnreachable` | fails the current query only |

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotesError {
    #[error("parse degraded for {path}: {reason}")]
    ParseDegraded { path: String, reason: String },

    #[error("embedding backend '{backend}' unavailable: {reason}")]
    EmbeddingUnavailable { backend: String, reason: String },

    #[error("vector store unreachable at {url}: {reason}")]
    StoreUnreachable { url: String, reason: String },

    #[error("vector store operation on collection '{collection}' failed: {reason}")]
    Store { collection: String, reason: String },

    #[error(
        "dimension mismatch for collection '{collection}': expected {expected}-dim vectors, \
         got {actual}"
    )]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("LLM host unreachable at {host}: {reason}")]
    LlmUnreachable { host: String, reason: String },

    #[error("invalid configuration for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("question is empty")]
    EmptyQuestion,
}

pub type Result<T> = std::result::Result<T, NotesError>;

impl NotesError {
    /// Short identifier of the error kind, printed by the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            NotesError::ParseDegraded { .. } => "ParseDegraded",
            NotesError::EmbeddingUnavailable { .. } => "EmbeddingUnavailable",
            NotesError::StoreUnreachable { .. } => "StoreUnreachable",
            NotesError::Store { .. } => "StoreError",
            NotesError::DimensionMismatch { .. } => "DimensionMismatch",
            NotesError::LlmUnreachable { .. } => "LLMUnreachable",
            NotesError::InvalidConfig { .. } => "InvalidConfig",
            NotesError::Io { .. } => "Io",
            NotesError::EmptyQuestion => "EmptyQuestion",
        }
    }

    /// Whether this error aborts a whole indexing run rather than one note.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            NotesError::StoreUnreachable { .. }
                | NotesError::DimensionMismatch { .. }
                | NotesError::InvalidConfig { .. }
        )
    }

    pub(crate) fn invalid_config(key: &str, reason: impl Into<String>) -> Self {
        NotesError::InvalidConfig {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
