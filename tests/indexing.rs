//! End-to-end indexing and query behaviour against the in-memory store.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::TempDir;

use common::*;
use notes_rag::embedding::Embedder;
use notes_rag::error::{NotesError, Result};
use notes_rag::indexer::Indexer;
use notes_rag::llm::LlmClient;
use notes_rag::models::{EmbeddedChunk, ScoredChunk};
use notes_rag::progress::NoProgress;
use notes_rag::query::NO_CONTEXT_ANSWER;
use notes_rag::session::Session;
use notes_rag::store::{InMemoryStore, SearchFilter, StoreStats, VectorStore};

struct Harness {
    _dir: TempDir,
    notes: std::path::PathBuf,
    store: Arc<InMemoryStore>,
    embedder: Arc<KeywordEmbedder>,
    llm: Arc<RecordingLlm>,
    session: Session,
}

async fn harness_with(configure: impl FnOnce(&mut notes_rag::config::Config)) -> Harness {
    let dir = TempDir::new().unwrap();
    let notes = dir.path().join("notes");
    std::fs::create_dir_all(&notes).unwrap();

    let mut config = test_config(&notes);
    configure(&mut config);

    let store = shared(InMemoryStore::new("meeting_notes"));
    let embedder = shared(KeywordEmbedder::new());
    let llm = shared(RecordingLlm::new("We ship on Friday [1]."));
    let session = Session::with_components(
        config,
        store.clone() as Arc<dyn VectorStore>,
        embedder.clone() as Arc<dyn Embedder>,
        llm.clone() as Arc<dyn LlmClient>,
    )
    .await
    .unwrap();

    Harness {
        _dir: dir,
        notes,
        store,
        embedder,
        llm,
        session,
    }
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

#[tokio::test]
async fn test_new_note_is_indexed_and_searchable() {
    let h = harness_with(|c| {
        c.chunking.chunk_size = 100;
        c.chunking.chunk_overlap = 0;
    })
    .await;
    write_note(&h.notes, "sprint-planning.md", SPRINT_PLANNING);

    let report = h.session.index(false, &NoProgress).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.new, vec!["sprint-planning.md".to_string()]);
    assert_eq!(report.chunks_embedded, 2);
    assert_eq!(h.store.keys_for("sprint-planning.md").len(), 2);

    let hits = h
        .session
        .search("when do we ship the search feature", 10, &SearchFilter::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    for hit in &hits {
        assert_eq!(hit.note_path, "sprint-planning.md");
        assert_eq!(hit.title, "Sprint Planning");
        assert_eq!(hit.date, NaiveDate::from_ymd_opt(2025, 9, 17));
        assert_eq!(hit.attendees, vec!["Alice".to_string(), "Bob".to_string()]);
    }
    assert!(hits.iter().any(|h| h.text.contains("ship the search feature")));
    assert!(hits.iter().any(|h| h.has_action_items));
}

#[tokio::test]
async fn test_second_run_over_unchanged_dir_is_free() {
    let h = harness().await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);
    write_note(&h.notes, "2025/retro.md", RETRO);

    h.session.index(false, &NoProgress).await.unwrap();
    let calls = h.embedder.calls();
    let mutations = h.store.mutations();
    assert!(calls > 0);

    let report = h.session.index(false, &NoProgress).await.unwrap();
    assert_eq!(report.unchanged, 2);
    assert!(!report.has_changes());
    assert_eq!(report.embedding_calls, 0);
    assert_eq!(h.embedder.calls(), calls);
    assert_eq!(h.store.mutations(), mutations);
}

#[tokio::test]
async fn test_only_the_delta_is_embedded() {
    let h = harness().await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);
    write_note(&h.notes, "retro.md", RETRO);
    h.session.index(false, &NoProgress).await.unwrap();
    let texts = h.embedder.texts();

    write_note(
        &h.notes,
        "retro.md",
        &RETRO.replace("flaky all week", "stable since Tuesday"),
    );
    let report = h.session.index(false, &NoProgress).await.unwrap();

    assert_eq!(report.modified, vec!["retro.md".to_string()]);
    assert_eq!(report.unchanged, 1);
    assert_eq!(h.embedder.texts() - texts, report.chunks_embedded);
    assert_eq!(report.chunks_embedded, h.store.keys_for("retro.md").len());
}

#[tokio::test]
async fn test_modified_note_leaves_no_stale_chunks() {
    let h = harness_with(|c| {
        c.chunking.chunk_size = 100;
        c.chunking.chunk_overlap = 0;
    })
    .await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);
    h.session.index(false, &NoProgress).await.unwrap();
    assert_eq!(h.store.keys_for("sprint.md").len(), 2);

    write_note(&h.notes, "sprint.md", "# Sprint Planning\nDate: 2025-09-17\n\nCancelled.\n");
    let report = h.session.index(false, &NoProgress).await.unwrap();
    assert_eq!(report.modified, vec!["sprint.md".to_string()]);

    assert_eq!(h.store.keys_for("sprint.md").len(), 1);
    let hits = h
        .session
        .search("search feature", 10, &SearchFilter::default())
        .await
        .unwrap();
    assert!(hits.iter().all(|h| h.text.contains("Cancelled")));
    let fingerprints = h.store.stored_fingerprints().await.unwrap();
    assert_eq!(fingerprints.len(), 1);
    assert!(!fingerprints["sprint.md"].is_empty());
}

#[tokio::test]
async fn test_deleted_note_is_removed() {
    let h = harness().await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);
    write_note(&h.notes, "retro.md", RETRO);
    h.session.index(false, &NoProgress).await.unwrap();

    std::fs::remove_file(h.notes.join("retro.md")).unwrap();
    let calls = h.embedder.calls();
    let report = h.session.index(false, &NoProgress).await.unwrap();

    assert_eq!(report.deleted, vec!["retro.md".to_string()]);
    assert_eq!(h.embedder.calls(), calls);
    assert!(h.store.keys_for("retro.md").is_empty());
    let hits = h
        .session
        .search("deploy pipeline runner", 10, &SearchFilter::default())
        .await
        .unwrap();
    assert!(hits.iter().all(|h| h.note_path != "retro.md"));
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let h = harness().await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);

    let report = h.session.index(true, &NoProgress).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.new, vec!["sprint.md".to_string()]);
    assert_eq!(h.embedder.calls(), 0);
    assert_eq!(h.store.mutations(), 0);
}

#[tokio::test]
async fn test_embedding_outage_keeps_previous_state_and_retries() {
    let h = harness().await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);
    h.session.index(false, &NoProgress).await.unwrap();
    let before = h.store.stored_fingerprints().await.unwrap();

    write_note(&h.notes, "sprint.md", &SPRINT_PLANNING.replace("Friday", "Monday"));
    write_note(&h.notes, "retro.md", RETRO);
    h.embedder.set_down(true);
    let report = h.session.index(false, &NoProgress).await.unwrap();

    assert!(!report.is_success());
    let failed: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
    assert!(failed.contains(&"sprint.md"));
    assert!(failed.contains(&"retro.md"));
    assert!(report.failed.iter().all(|f| f.kind == "EmbeddingUnavailable"));
    assert_eq!(h.store.stored_fingerprints().await.unwrap(), before);

    h.embedder.set_down(false);
    let report = h.session.index(false, &NoProgress).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.new, vec!["retro.md".to_string()]);
    assert_eq!(report.modified, vec!["sprint.md".to_string()]);
}

/// Store that rejects writes for one note path.
struct FlakyStore {
    inner: InMemoryStore,
    reject: String,
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn collection(&self) -> &str {
        self.inner.collection()
    }
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<()> {
        self.inner.ensure_collection(dims, model).await
    }
    async fn stored_fingerprints(&self) -> Result<HashMap<String, String>> {
        self.inner.stored_fingerprints().await
    }
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        if chunks.iter().any(|c| c.chunk.metadata.note_path == self.reject) {
            return Err(NotesError::Store {
                collection: "meeting_notes".to_string(),
                reason: "constraint failed".to_string(),
            });
        }
        self.inner.upsert(chunks).await
    }
    async fn replace_note(&self, note_path: &str, chunks: &[EmbeddedChunk]) -> Result<()> {
        self.inner.replace_note(note_path, chunks).await
    }
    async fn delete_by_note_path(&self, note_path: &str) -> Result<usize> {
        self.inner.delete_by_note_path(note_path).await
    }
    async fn search(&self, query: &[f32], k: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
        self.inner.search(query, k, filter).await
    }
    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }
}

#[tokio::test]
async fn test_partial_failure_is_reported_per_path() {
    let dir = TempDir::new().unwrap();
    write_note(dir.path(), "sprint.md", SPRINT_PLANNING);
    write_note(dir.path(), "retro.md", RETRO);

    let store = Arc::new(FlakyStore {
        inner: InMemoryStore::new("meeting_notes"),
        reject: "retro.md".to_string(),
    });
    let embedder = Arc::new(KeywordEmbedder::new());
    store.ensure_collection(DIMS, "keyword-bag").await.unwrap();
    let indexer = Indexer::new(&test_config(dir.path()), store.clone(), embedder).unwrap();

    let report = indexer.run(false, &NoProgress).await.unwrap();
    assert_eq!(report.notes_written, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "retro.md");
    assert_eq!(report.failed[0].kind, "StoreError");

    let fingerprints = store.stored_fingerprints().await.unwrap();
    assert!(fingerprints.contains_key("sprint.md"));
    assert!(!fingerprints.contains_key("retro.md"));

    // The failed note is retried on the next run.
    let report = indexer.run(false, &NoProgress).await.unwrap();
    assert_eq!(report.new, vec!["retro.md".to_string()]);
}

#[tokio::test]
async fn test_dimension_mismatch_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new("meeting_notes"));
    store.ensure_collection(DIMS * 2, "bigger-model").await.unwrap();

    let err = Session::with_components(
        test_config(dir.path()),
        store as Arc<dyn VectorStore>,
        Arc::new(KeywordEmbedder::new()) as Arc<dyn Embedder>,
        Arc::new(RecordingLlm::new("")) as Arc<dyn LlmClient>,
    )
    .await
    .err()
    .expect("mismatch must fail");
    assert_eq!(err.kind(), "DimensionMismatch");
}

#[tokio::test]
async fn test_answer_attributes_source_notes() {
    let h = harness().await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);
    write_note(&h.notes, "retro.md", RETRO);
    h.session.index(false, &NoProgress).await.unwrap();

    let result = h
        .session
        .ask("When will we ship the search feature?", &SearchFilter::default())
        .await
        .unwrap();
    assert_eq!(result.answer, "We ship on Friday [1].");
    let paths: Vec<&str> = result
        .attributions
        .iter()
        .map(|a| a.note_path.as_str())
        .collect();
    assert_eq!(paths, vec!["sprint.md"]);
    assert_eq!(result.attributions[0].date, NaiveDate::from_ymd_opt(2025, 9, 17));
    // Both notes reached the context; only the cited one is attributed.
    assert!(result.chunks.iter().any(|c| c.note_path == "retro.md"));

    let prompts = h.llm.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Sprint Planning (2025-09-17) sprint.md"));
    assert!(prompts[0].contains("When will we ship the search feature?"));
}

#[tokio::test]
async fn test_filtered_ask_without_hits_skips_llm() {
    let h = harness().await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);
    h.session.index(false, &NoProgress).await.unwrap();

    let filter = SearchFilter {
        attendee: Some("Zed".to_string()),
        ..Default::default()
    };
    let result = h.session.ask("What did Zed say?", &filter).await.unwrap();
    assert_eq!(result.answer, NO_CONTEXT_ANSWER);
    assert!(result.attributions.is_empty());
    assert!(h.llm.prompts().is_empty());
}

#[tokio::test]
async fn test_attendee_filter_narrows_search() {
    let h = harness().await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);
    write_note(&h.notes, "retro.md", RETRO);
    h.session.index(false, &NoProgress).await.unwrap();

    let filter = SearchFilter {
        attendee: Some("carol".to_string()),
        ..Default::default()
    };
    let hits = h.session.search("ship the feature", 10, &filter).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.note_path == "retro.md"));
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let h = harness().await;
    let err = h
        .session
        .ask("   ", &SearchFilter::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "EmptyQuestion");
}

#[tokio::test]
async fn test_stalled_llm_times_out_without_touching_index() {
    let dir = TempDir::new().unwrap();
    write_note(dir.path(), "sprint.md", SPRINT_PLANNING);
    let store = Arc::new(InMemoryStore::new("meeting_notes"));
    let session = Session::with_components(
        test_config(dir.path()),
        store.clone() as Arc<dyn VectorStore>,
        Arc::new(KeywordEmbedder::new()) as Arc<dyn Embedder>,
        Arc::new(StalledLlm) as Arc<dyn LlmClient>,
    )
    .await
    .unwrap();
    session.index(false, &NoProgress).await.unwrap();
    let mutations = store.mutations();

    let err = session
        .spawn_ask("When do we ship?".to_string(), SearchFilter::default())
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), "LLMUnreachable");
    assert_eq!(store.mutations(), mutations);
}

#[tokio::test]
async fn test_concurrent_runs_do_not_double_index() {
    let h = harness().await;
    write_note(&h.notes, "sprint.md", SPRINT_PLANNING);
    write_note(&h.notes, "retro.md", RETRO);

    let a = h.session.spawn_index(false, Arc::new(NoProgress));
    let b = h.session.spawn_index(false, Arc::new(NoProgress));
    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

    assert_eq!(a.new.len() + b.new.len(), 2);
    assert_eq!(a.unchanged + b.unchanged, 2);
    assert_eq!(h.store.stats().await.unwrap().notes, 2);
}

#[tokio::test]
async fn test_diary_meetings_are_indexed_separately() {
    let h = harness().await;
    write_note(&h.notes, "diary.md", DIARY);

    let report = h.session.index(false, &NoProgress).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.chunks_embedded, 2);
    assert_eq!(h.store.keys_for("diary.md").len(), 2);

    let second_meeting = SearchFilter {
        attendee: Some("åsa".to_string()),
        ..Default::default()
    };
    let hits = h.session.search("invoice schema", 10, &second_meeting).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Design review");
    assert_eq!(hits[0].date, NaiveDate::from_ymd_opt(2025, 9, 3));
    assert!(hits[0].has_action_items);

    let first_day = SearchFilter {
        date: NaiveDate::from_ymd_opt(2025, 9, 1),
        ..Default::default()
    };
    let hits = h.session.search("payments", 10, &first_day).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Standup");
    assert_eq!(hits[0].attendees, vec!["Alice".to_string(), "Bob".to_string()]);
}
