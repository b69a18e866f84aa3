//! Incremental indexing pipeline.
//!
//! One run moves through `SCAN → CLASSIFY → PARSE_DELTA → EMBED_DELTA →
//! RECONCILE_STORE → DONE`:
//!
//! 1. **Scan** the notes directory and fingerprint every note.
//! 2. **Classify** each path as new, modified, unchanged, or deleted against
//!    the fingerprints recorded in the store.
//! 3. **Parse** and chunk only new and modified notes.
//! 4. **Embed** the delta in batches of whole notes.
//! 5. **Reconcile**: replace each modified note's chunks in one store step,
//!    insert new notes, and remove deleted ones.
//!
//! A run over an unchanged directory performs one fingerprint comparison
//! per note and nothing else: no parsing, no embedding calls, no writes.
//!
//! Failures are contained per note. A note whose embedding or write fails
//! keeps its previous chunks and is reported by path; the next run sees
//! the old fingerprint and retries it. Store connectivity errors and
//! configuration errors stop the run.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::change::{classify, ChangeKind};
use crate::chunk::chunk_meetings;
use crate::config::{ChunkingConfig, Config, NotesConfig};
use crate::embedding::Embedder;
use crate::error::{NotesError, Result};
use crate::models::{Chunk, EmbeddedChunk, Note, NoteWarning};
use crate::parser::NoteParser;
use crate::progress::{IndexProgressEvent, ProgressReporter};
use crate::scan::{scan_notes, ScanOutcome};
use crate::store::VectorStore;

/// A note that could not be indexed this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedNote {
    pub path: String,
    /// Error kind, e.g. `EmbeddingUnavailable`.
    pub kind: String,
    pub error: String,
}

/// Outcome of one index run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub dry_run: bool,
    pub recursive: bool,
    pub scanned: usize,
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: usize,
    pub deleted: Vec<String>,
    pub unreadable: Vec<String>,
    pub chunks_embedded: usize,
    pub embedding_calls: usize,
    pub notes_written: usize,
    pub failed: Vec<FailedNote>,
    pub warnings: Vec<NoteWarning>,
}

impl IndexReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Whether the run changed, or (for a dry run) would change, the store.
    pub fn has_changes(&self) -> bool {
        !(self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }
}

struct PendingNote {
    path: String,
    kind: ChangeKind,
    chunks: Vec<Chunk>,
}

pub struct Indexer {
    notes: NotesConfig,
    chunking: ChunkingConfig,
    batch_size: usize,
    parser: NoteParser,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    run_lock: Mutex<()>,
}

impl Indexer {
    pub fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        Ok(Self {
            notes: config.notes.clone(),
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size.max(1),
            parser: NoteParser::new(&config.parser)?,
            store,
            embedder,
            run_lock: Mutex::new(()),
        })
    }

    /// Run one indexing pass. Concurrent calls wait for each other.
    ///
    /// With `dry_run`, the run stops after classification and reports what
    /// would change without parsing, embedding, or writing.
    pub async fn run(&self, dry_run: bool, progress: &dyn ProgressReporter) -> Result<IndexReport> {
        let _guard = self.run_lock.lock().await;

        // SCAN
        progress.report(IndexProgressEvent::Scanning {
            dir: self.notes.dir.display().to_string(),
        });
        let scan = self.scan().await?;
        for w in &scan.warnings {
            warn!(path = %w.path, reason = %w.reason, "ParseDegraded");
        }

        // CLASSIFY
        let stored = self.store.stored_fingerprints().await?;
        let changes = classify(&scan.notes, &stored, &scan.unreadable);

        let mut report = IndexReport {
            dry_run,
            recursive: scan.recursive,
            scanned: scan.notes.len(),
            new: changes.new.clone(),
            modified: changes.modified.clone(),
            unchanged: changes.unchanged.len(),
            deleted: changes.deleted.clone(),
            unreadable: scan.unreadable.clone(),
            warnings: scan.warnings.clone(),
            ..IndexReport::default()
        };
        progress.report(IndexProgressEvent::Classified {
            new: changes.new.len() as u64,
            modified: changes.modified.len() as u64,
            unchanged: changes.unchanged.len() as u64,
            deleted: changes.deleted.len() as u64,
        });
        info!(
            scanned = report.scanned,
            new = changes.new.len(),
            modified = changes.modified.len(),
            unchanged = changes.unchanged.len(),
            deleted = changes.deleted.len(),
            recursive = scan.recursive,
            "Classified notes"
        );

        if dry_run || changes.is_noop() {
            progress.report(IndexProgressEvent::Done);
            return Ok(report);
        }

        // PARSE_DELTA
        let by_path: BTreeMap<&str, &Note> =
            scan.notes.iter().map(|n| (n.path.as_str(), n)).collect();
        let mut pending = Vec::new();
        for path in changes.delta() {
            let Some(note) = by_path.get(path.as_str()) else {
                continue;
            };
            let kind = changes.kind_of(path).unwrap_or(ChangeKind::New);
            pending.push(self.parse(note, kind, &mut report));
        }

        // EMBED_DELTA
        let embedded = self.embed_delta(pending, &mut report, progress).await?;

        // RECONCILE_STORE
        let total = (embedded.len() + changes.deleted.len()) as u64;
        let mut done = 0u64;
        let mut halted: Option<NotesError> = None;

        for (note, chunks) in embedded {
            if let Some(err) = &halted {
                report.failed.push(failed(&note.path, err));
                continue;
            }
            let result = match note.kind {
                ChangeKind::Modified => self.store.replace_note(&note.path, &chunks).await,
                _ => self.store.upsert(&chunks).await,
            };
            match result {
                Ok(()) => {
                    report.notes_written += 1;
                    debug!(path = %note.path, chunks = chunks.len(), "Indexed note");
                }
                Err(err) => {
                    warn!(path = %note.path, error = %err, "Failed to write note");
                    report.failed.push(failed(&note.path, &err));
                    if err.is_fatal_for_run() {
                        halted = Some(err);
                    }
                }
            }
            done += 1;
            progress.report(IndexProgressEvent::Reconciling { n: done, total });
        }

        for path in &changes.deleted {
            if let Some(err) = &halted {
                report.failed.push(failed(path, err));
                continue;
            }
            match self.store.delete_by_note_path(path).await {
                Ok(removed) => debug!(path = %path, removed, "Removed deleted note"),
                Err(err) => {
                    warn!(path = %path, error = %err, "Failed to remove note");
                    report.failed.push(failed(path, &err));
                    if err.is_fatal_for_run() {
                        halted = Some(err);
                    }
                }
            }
            done += 1;
            progress.report(IndexProgressEvent::Reconciling { n: done, total });
        }

        progress.report(IndexProgressEvent::Done);
        info!(
            written = report.notes_written,
            deleted = changes.deleted.len(),
            chunks = report.chunks_embedded,
            embedding_calls = report.embedding_calls,
            failed = report.failed.len(),
            "Index run finished"
        );
        Ok(report)
    }

    async fn scan(&self) -> Result<ScanOutcome> {
        let notes = self.notes.clone();
        tokio::task::spawn_blocking(move || scan_notes(&notes))
            .await
            .map_err(|e| NotesError::Io {
                path: self.notes.dir.clone(),
                source: std::io::Error::other(e.to_string()),
            })?
    }

    fn parse(&self, note: &Note, kind: ChangeKind, report: &mut IndexReport) -> PendingNote {
        let meetings = self
            .parser
            .parse_meetings(&note.path, &note.content, note.modified_at);
        if meetings.len() > 1 {
            debug!(path = %note.path, meetings = meetings.len(), "Split meeting diary");
        }
        for reason in meetings.iter().flat_map(|m| &m.warnings) {
            let err = NotesError::ParseDegraded {
                path: note.path.clone(),
                reason: reason.clone(),
            };
            warn!(path = %note.path, "{}", err);
            report.warnings.push(NoteWarning::new(&note.path, reason.clone()));
        }
        PendingNote {
            path: note.path.clone(),
            kind,
            chunks: chunk_meetings(note, &meetings, &self.chunking),
        }
    }

    /// Embed the delta in groups of whole notes of at most `batch_size`
    /// chunks. A note larger than `batch_size` forms its own group and is
    /// sent in several calls.
    ///
    /// Returns the notes whose chunks were all embedded. Once the backend
    /// is unavailable, the rest of the delta is reported as failed without
    /// further calls.
    async fn embed_delta(
        &self,
        pending: Vec<PendingNote>,
        report: &mut IndexReport,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<(PendingNote, Vec<EmbeddedChunk>)>> {
        let total_chunks: usize = pending.iter().map(|n| n.chunks.len()).sum();
        let mut embedded_count = 0usize;
        let mut out = Vec::with_capacity(pending.len());
        let mut unavailable: Option<NotesError> = None;

        for group in group_notes(pending, self.batch_size) {
            if let Some(err) = &unavailable {
                for note in &group {
                    report.failed.push(failed(&note.path, err));
                }
                continue;
            }

            let texts: Vec<String> = group
                .iter()
                .flat_map(|n| n.chunks.iter().map(|c| c.embedding_text()))
                .collect();

            let mut vectors = Vec::with_capacity(texts.len());
            let mut error = None;
            for slice in texts.chunks(self.batch_size) {
                report.embedding_calls += 1;
                match self.embedder.embed(slice).await {
                    Ok(mut batch) => vectors.append(&mut batch),
                    Err(err) => {
                        error = Some(err);
                        break;
                    }
                }
            }

            if let Some(err) = error {
                if err.is_fatal_for_run() {
                    return Err(err);
                }
                warn!(
                    notes = group.len(),
                    error = %err,
                    "Embedding failed; notes keep their previous chunks"
                );
                for note in &group {
                    report.failed.push(failed(&note.path, &err));
                }
                if matches!(err, NotesError::EmbeddingUnavailable { .. }) {
                    unavailable = Some(err);
                }
                continue;
            }

            let mut vectors = vectors.into_iter();
            for note in group {
                let chunks: Vec<EmbeddedChunk> = note
                    .chunks
                    .iter()
                    .cloned()
                    .zip(vectors.by_ref())
                    .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
                    .collect();
                embedded_count += chunks.len();
                report.chunks_embedded += chunks.len();
                out.push((note, chunks));
            }
            progress.report(IndexProgressEvent::Embedding {
                n: embedded_count as u64,
                total: total_chunks as u64,
            });
        }

        Ok(out)
    }
}

/// Pack notes, in order, into groups whose chunk total stays within
/// `batch_size`. Oversized notes get a group of their own.
fn group_notes(notes: Vec<PendingNote>, batch_size: usize) -> Vec<Vec<PendingNote>> {
    let mut groups = Vec::new();
    let mut current: Vec<PendingNote> = Vec::new();
    let mut current_chunks = 0;

    for note in notes {
        let n = note.chunks.len();
        if !current.is_empty() && current_chunks + n > batch_size {
            groups.push(std::mem::take(&mut current));
            current_chunks = 0;
        }
        current_chunks += n;
        current.push(note);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn failed(path: &str, err: &NotesError) -> FailedNote {
    FailedNote {
        path: path.to_string(),
        kind: err.kind().to_string(),
        error: err.to_string(),
    }
}
