//! In-memory [`VectorStore`] implementation for tests and throwaway sessions.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity over all stored vectors. Every chunk written or removed
//! is counted, so tests can assert that a run mutated nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{rank, SearchFilter, StoreStats, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::{NotesError, Result};
use crate::models::{ChunkMetadata, EmbeddedChunk, ScoredChunk};

struct StoredChunk {
    metadata: ChunkMetadata,
    text: String,
    vector: Vec<f32>,
    indexed_at: String,
}

struct CollectionInfo {
    dims: usize,
    model: String,
}

pub struct InMemoryStore {
    collection: String,
    info: RwLock<Option<CollectionInfo>>,
    chunks: RwLock<BTreeMap<String, StoredChunk>>,
    mutations: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            info: RwLock::new(None),
            chunks: RwLock::new(BTreeMap::new()),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Number of chunk writes and removals since creation.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Stored chunk keys of one note, in ordinal order.
    pub fn keys_for(&self, note_path: &str) -> Vec<String> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<(usize, String)> = chunks
            .iter()
            .filter(|(_, c)| c.metadata.note_path == note_path)
            .map(|(key, c)| (c.metadata.ordinal, key.clone()))
            .collect();
        found.sort();
        found.into_iter().map(|(_, key)| key).collect()
    }

    fn check_dims(&self, len: usize) -> Result<()> {
        let info = self.info.read().unwrap_or_else(PoisonError::into_inner);
        match info.as_ref() {
            Some(info) if info.dims != len => Err(NotesError::DimensionMismatch {
                collection: self.collection.clone(),
                expected: info.dims,
                actual: len,
            }),
            _ => Ok(()),
        }
    }

    fn insert_all(&self, map: &mut BTreeMap<String, StoredChunk>, chunks: &[EmbeddedChunk]) {
        let now = chrono::Utc::now().to_rfc3339();
        for ec in chunks {
            map.insert(
                ec.chunk.id.key(),
                StoredChunk {
                    metadata: ec.chunk.metadata.clone(),
                    text: ec.chunk.text.clone(),
                    vector: ec.vector.clone(),
                    indexed_at: now.clone(),
                },
            );
        }
        self.mutations.fetch_add(chunks.len(), Ordering::SeqCst);
    }

    fn remove_note(&self, map: &mut BTreeMap<String, StoredChunk>, note_path: &str) -> usize {
        let before = map.len();
        map.retain(|_, c| c.metadata.note_path != note_path);
        let removed = before - map.len();
        self.mutations.fetch_add(removed, Ordering::SeqCst);
        removed
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<()> {
        let mut info = self.info.write().unwrap_or_else(PoisonError::into_inner);
        match info.as_ref() {
            Some(existing) if existing.dims != dims => Err(NotesError::DimensionMismatch {
                collection: self.collection.clone(),
                expected: existing.dims,
                actual: dims,
            }),
            Some(_) => Ok(()),
            None => {
                *info = Some(CollectionInfo {
                    dims,
                    model: model.to_string(),
                });
                Ok(())
            }
        }
    }

    async fn stored_fingerprints(&self) -> Result<HashMap<String, String>> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: HashMap<String, String> = HashMap::new();
        for c in chunks.values() {
            let fp = &c.metadata.fingerprint;
            out.entry(c.metadata.note_path.clone())
                .and_modify(|existing| {
                    if existing != fp {
                        existing.clear();
                    }
                })
                .or_insert_with(|| fp.clone());
        }
        Ok(out)
    }

    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        for ec in chunks {
            self.check_dims(ec.vector.len())?;
        }
        let mut map = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        self.insert_all(&mut map, chunks);
        Ok(())
    }

    async fn replace_note(&self, note_path: &str, chunks: &[EmbeddedChunk]) -> Result<()> {
        for ec in chunks {
            self.check_dims(ec.vector.len())?;
        }
        // One write guard covers both steps, so readers never see a mix.
        let mut map = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        self.remove_note(&mut map, note_path);
        self.insert_all(&mut map, chunks);
        Ok(())
    }

    async fn delete_by_note_path(&self, note_path: &str) -> Result<usize> {
        let mut map = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        Ok(self.remove_note(&mut map, note_path))
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        self.check_dims(query.len())?;
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let candidates = chunks
            .iter()
            .filter(|(_, c)| {
                filter.matches(
                    &c.metadata.note_path,
                    &c.metadata.title,
                    c.metadata.date,
                    &c.metadata.attendees,
                )
            })
            .map(|(key, c)| ScoredChunk {
                key: key.clone(),
                note_path: c.metadata.note_path.clone(),
                ordinal: c.metadata.ordinal,
                fingerprint: c.metadata.fingerprint.clone(),
                title: c.metadata.title.clone(),
                date: c.metadata.date,
                attendees: c.metadata.attendees.clone(),
                has_action_items: c.metadata.has_action_items,
                text: c.text.clone(),
                score: cosine_similarity(query, &c.vector),
            })
            .collect();
        Ok(rank(candidates, k))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let info = self.info.read().unwrap_or_else(PoisonError::into_inner);
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut notes: Vec<&str> = chunks
            .values()
            .map(|c| c.metadata.note_path.as_str())
            .collect();
        notes.sort_unstable();
        notes.dedup();
        Ok(StoreStats {
            collection: self.collection.clone(),
            model: info.as_ref().map(|i| i.model.clone()),
            dims: info.as_ref().map(|i| i.dims),
            notes: notes.len(),
            chunks: chunks.len(),
            last_indexed: chunks.values().map(|c| c.indexed_at.clone()).max(),
        })
    }
}
