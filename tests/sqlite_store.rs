//! SQLite vector store against a temporary database file.

use chrono::NaiveDate;
use tempfile::TempDir;

use notes_rag::config::StoreConfig;
use notes_rag::models::{Chunk, ChunkId, ChunkMetadata, EmbeddedChunk};
use notes_rag::store::{SearchFilter, SqliteStore, VectorStore};

fn store_in(dir: &TempDir) -> SqliteStore {
    store_named(dir, "meeting_notes")
}

fn store_config(dir: &TempDir, collection: &str) -> StoreConfig {
    StoreConfig {
        url: format!("sqlite://{}", dir.path().join("data/notes.sqlite").display()),
        collection: collection.to_string(),
    }
}

fn store_named(dir: &TempDir, collection: &str) -> SqliteStore {
    SqliteStore::connect_lazy(&store_config(dir, collection)).unwrap()
}

fn chunk(
    path: &str,
    ordinal: usize,
    fingerprint: &str,
    date: Option<NaiveDate>,
    attendees: &[&str],
    text: &str,
    vector: Vec<f32>,
) -> EmbeddedChunk {
    EmbeddedChunk {
        chunk: Chunk {
            id: ChunkId::new(path, ordinal),
            text: text.to_string(),
            metadata: ChunkMetadata {
                note_path: path.to_string(),
                fingerprint: fingerprint.to_string(),
                ordinal,
                title: format!("Title of {}", path),
                date,
                date_inferred: false,
                attendees: attendees.iter().map(|a| a.to_string()).collect(),
                has_action_items: false,
                has_open_action_items: false,
            },
        },
        vector,
    }
}

fn day(d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2025, 9, d)
}

#[tokio::test]
async fn test_collection_dimensions_are_enforced() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.ensure_collection(3, "tiny").await.unwrap();
    store.ensure_collection(3, "tiny").await.unwrap();

    let err = store.ensure_collection(4, "tiny").await.unwrap_err();
    assert_eq!(err.kind(), "DimensionMismatch");

    // A fresh handle on the same file sees the recorded dimensionality.
    let reopened = store_in(&dir);
    let err = reopened.ensure_collection(384, "all-minilm").await.unwrap_err();
    assert!(err.to_string().contains("384"));

    let stats = reopened.stats().await.unwrap();
    assert_eq!(stats.dims, Some(3));
    assert_eq!(stats.model.as_deref(), Some("tiny"));
}

#[tokio::test]
async fn test_upsert_is_idempotent_by_chunk_id() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.ensure_collection(3, "tiny").await.unwrap();

    let chunks = vec![
        chunk("a.md", 0, "fa", day(1), &[], "alpha one", vec![1.0, 0.0, 0.0]),
        chunk("a.md", 1, "fa", day(1), &[], "alpha two", vec![0.0, 1.0, 0.0]),
    ];
    store.upsert(&chunks).await.unwrap();
    store.upsert(&chunks).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.chunks, 2);
    assert_eq!(stats.notes, 1);
    assert!(stats.last_indexed.is_some());

    let fingerprints = store.stored_fingerprints().await.unwrap();
    assert_eq!(fingerprints["a.md"], "fa");
}

#[tokio::test]
async fn test_replace_note_drops_surplus_chunks() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.ensure_collection(3, "tiny").await.unwrap();
    store
        .upsert(&[
            chunk("a.md", 0, "old", day(1), &[], "old zero", vec![1.0, 0.0, 0.0]),
            chunk("a.md", 1, "old", day(1), &[], "old one", vec![0.0, 1.0, 0.0]),
            chunk("a.md", 2, "old", day(1), &[], "old two", vec![0.0, 0.0, 1.0]),
        ])
        .await
        .unwrap();

    store
        .replace_note(
            "a.md",
            &[chunk("a.md", 0, "new", day(1), &[], "new zero", vec![1.0, 0.0, 0.0])],
        )
        .await
        .unwrap();

    let hits = store
        .search(&[0.0, 0.0, 1.0], 10, &SearchFilter::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "new zero");
    assert_eq!(store.stored_fingerprints().await.unwrap()["a.md"], "new");
}

#[tokio::test]
async fn test_delete_by_note_path() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.ensure_collection(3, "tiny").await.unwrap();
    store
        .upsert(&[
            chunk("a.md", 0, "fa", day(1), &[], "a", vec![1.0, 0.0, 0.0]),
            chunk("b.md", 0, "fb", day(2), &[], "b", vec![1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();

    assert_eq!(store.delete_by_note_path("a.md").await.unwrap(), 1);
    assert_eq!(store.delete_by_note_path("a.md").await.unwrap(), 0);
    let fingerprints = store.stored_fingerprints().await.unwrap();
    assert_eq!(fingerprints.len(), 1);
    assert!(fingerprints.contains_key("b.md"));
}

#[tokio::test]
async fn test_ties_prefer_newer_notes() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.ensure_collection(3, "tiny").await.unwrap();
    store
        .upsert(&[
            chunk("old.md", 0, "f1", day(1), &[], "same", vec![1.0, 0.0, 0.0]),
            chunk("new.md", 0, "f2", day(20), &[], "same", vec![1.0, 0.0, 0.0]),
            chunk("far.md", 0, "f3", day(25), &[], "other", vec![0.0, 1.0, 0.0]),
        ])
        .await
        .unwrap();

    let hits = store
        .search(&[1.0, 0.0, 0.0], 2, &SearchFilter::default())
        .await
        .unwrap();
    let paths: Vec<&str> = hits.iter().map(|h| h.note_path.as_str()).collect();
    assert_eq!(paths, vec!["new.md", "old.md"]);
}

#[tokio::test]
async fn test_metadata_filters() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.ensure_collection(3, "tiny").await.unwrap();
    store
        .upsert(&[
            chunk("a.md", 0, "fa", day(17), &["Alice", "Bob"], "a", vec![1.0, 0.0, 0.0]),
            chunk("b.md", 0, "fb", day(18), &["Carol"], "b", vec![1.0, 0.0, 0.0]),
            chunk("100%.md", 0, "fc", day(18), &["Dave"], "c", vec![1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();

    let by_attendee = SearchFilter {
        attendee: Some("alice".to_string()),
        ..Default::default()
    };
    let hits = store.search(&[1.0, 0.0, 0.0], 10, &by_attendee).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].note_path, "a.md");
    assert_eq!(hits[0].attendees, vec!["Alice".to_string(), "Bob".to_string()]);

    let by_date = SearchFilter {
        date: day(18),
        ..Default::default()
    };
    let hits = store.search(&[1.0, 0.0, 0.0], 10, &by_date).await.unwrap();
    assert_eq!(hits.len(), 2);

    let by_title = SearchFilter {
        title: Some("OF 100%".to_string()),
        ..Default::default()
    };
    let hits = store.search(&[1.0, 0.0, 0.0], 10, &by_title).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].note_path, "100%.md");
}

#[tokio::test]
async fn test_wrong_vector_length_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.ensure_collection(3, "tiny").await.unwrap();

    let err = store
        .upsert(&[chunk("a.md", 0, "fa", day(1), &[], "a", vec![1.0, 0.0])])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "DimensionMismatch");
}

#[tokio::test]
async fn test_keyword_collection_names_work() {
    let dir = TempDir::new().unwrap();
    let store = store_named(&dir, "order");
    store.ensure_collection(3, "tiny").await.unwrap();
    store
        .upsert(&[chunk("a.md", 0, "fa", day(1), &[], "a", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap();
    assert_eq!(store.stats().await.unwrap().chunks, 1);
    assert_eq!(
        store
            .search(&[1.0, 0.0, 0.0], 5, &SearchFilter::default())
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(store.delete_by_note_path("a.md").await.unwrap(), 1);
}

#[tokio::test]
async fn test_attendee_filter_matches_names_not_json() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.ensure_collection(3, "tiny").await.unwrap();
    store
        .upsert(&[
            chunk("a.md", 0, "fa", day(1), &["Åsa Berg", "Bob"], "a", vec![1.0, 0.0, 0.0]),
            chunk("b.md", 0, "fb", day(2), &["Carol"], "b", vec![1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();

    let by_name = SearchFilter {
        attendee: Some("åsa".to_string()),
        ..Default::default()
    };
    let hits = store.search(&[1.0, 0.0, 0.0], 10, &by_name).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].note_path, "a.md");

    let by_separator = SearchFilter {
        attendee: Some("\",\"".to_string()),
        ..Default::default()
    };
    let hits = store.search(&[1.0, 0.0, 0.0], 10, &by_separator).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_read_only_store_never_writes() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.ensure_collection(3, "tiny").await.unwrap();
    store
        .upsert(&[chunk("a.md", 0, "fa", day(1), &[], "a", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap();

    let reader = SqliteStore::connect_read_only(&store_config(&dir, "meeting_notes")).unwrap();
    reader.ensure_collection(3, "tiny").await.unwrap();
    assert_eq!(
        reader.ensure_collection(4, "tiny").await.unwrap_err().kind(),
        "DimensionMismatch"
    );
    assert_eq!(reader.stored_fingerprints().await.unwrap()["a.md"], "fa");
    assert!(reader
        .upsert(&[chunk("b.md", 0, "fb", day(2), &[], "b", vec![0.0, 1.0, 0.0])])
        .await
        .is_err());

    // A collection that was never created reads as empty and stays absent.
    let other = SqliteStore::connect_read_only(&store_config(&dir, "other_notes")).unwrap();
    other.ensure_collection(3, "tiny").await.unwrap();
    assert!(other.stored_fingerprints().await.unwrap().is_empty());
    assert!(store_named(&dir, "other_notes").stats().await.is_err());
    assert_eq!(store.stats().await.unwrap().chunks, 1);
}
