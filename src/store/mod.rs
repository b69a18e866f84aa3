//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers everything the indexer and the query
//! pipeline need from storage: the per-collection dimension check, the
//! stored fingerprint per note (the only index state), idempotent chunk
//! upserts keyed by chunk identity, per-note replacement and deletion, and
//! filtered similarity search.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`] | persistent store behind `store.url` |
//! | [`InMemoryStore`] | tests and throwaway sessions |

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::models::{EmbeddedChunk, ScoredChunk};

/// Metadata filters applied before ranking.
///
/// `attendee` and `title` match case-insensitive substrings; `date` and
/// `note_path` match exactly. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchFilter {
    pub note_path: Option<String>,
    pub attendee: Option<String>,
    pub date: Option<NaiveDate>,
    pub title: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.note_path.is_none()
            && self.attendee.is_none()
            && self.date.is_none()
            && self.title.is_none()
    }

    pub fn matches(
        &self,
        note_path: &str,
        title: &str,
        date: Option<NaiveDate>,
        attendees: &[String],
    ) -> bool {
        if let Some(path) = &self.note_path {
            if path != note_path {
                return false;
            }
        }
        if let Some(d) = self.date {
            if date != Some(d) {
                return false;
            }
        }
        if let Some(t) = &self.title {
            if !title.to_lowercase().contains(&t.to_lowercase()) {
                return false;
            }
        }
        if let Some(a) = &self.attendee {
            let needle = a.to_lowercase();
            if !attendees
                .iter()
                .any(|name| name.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
        true
    }
}

/// Summary of one collection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub collection: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub notes: usize,
    pub chunks: usize,
    pub last_indexed: Option<String>,
}

/// Storage backend for chunk vectors and their metadata.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorStore::ensure_collection) | create the collection or verify its dimensionality |
/// | [`stored_fingerprints`](VectorStore::stored_fingerprints) | fingerprint per indexed note path |
/// | [`upsert`](VectorStore::upsert) | insert or overwrite chunks by identity |
/// | [`replace_note`](VectorStore::replace_note) | delete a note's chunks and insert new ones atomically |
/// | [`delete_by_note_path`](VectorStore::delete_by_note_path) | remove every chunk of a note |
/// | [`search`](VectorStore::search) | ranked cosine similarity search |
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection(&self) -> &str;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<()>;

    /// Create the collection for `dims`-dimensional vectors, or verify that
    /// an existing one has exactly that dimensionality.
    ///
    /// A mismatch is [`NotesError::DimensionMismatch`](crate::error::NotesError::DimensionMismatch);
    /// the collection is never altered to fit.
    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<()>;

    /// Fingerprint recorded for each note path. A path whose chunks carry
    /// more than one fingerprint maps to `""` so that it reads as modified.
    async fn stored_fingerprints(&self) -> Result<HashMap<String, String>>;

    /// Insert or overwrite chunks by identity. Re-upserting is a no-op in effect.
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Replace all chunks of `note_path` with `chunks` in one step.
    /// Readers see either the old chunk set or the new one.
    async fn replace_note(&self, note_path: &str, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Remove all chunks of `note_path`; returns how many were removed.
    async fn delete_by_note_path(&self, note_path: &str) -> Result<usize>;

    /// Top `k` chunks by cosine similarity, ties broken by newer note date.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Sort by score (descending), then newer date, then path and ordinal; keep `k`.
pub fn rank(mut candidates: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.date.cmp(&a.date))
            .then_with(|| a.note_path.cmp(&b.note_path))
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });
    candidates.truncate(k);
    candidates
}
