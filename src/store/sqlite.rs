//! SQLite-backed [`VectorStore`].
//!
//! Each collection is one table; a shared `collections` table records the
//! dimensionality and model of every collection so that a configuration
//! change cannot silently mix vector sizes.
//!
//! ```text
//! collections(name PK, dims, model, created_at)
//! <collection>(id PK, note_path, fingerprint, ordinal, title, note_date,
//!              date_inferred, attendees JSON, has_action_items,
//!              has_open_action_items, text, embedding BLOB, indexed_at,
//!              UNIQUE(note_path, ordinal))
//! ```
//!
//! Vectors are stored as little-endian `f32` BLOBs and ranked in process by
//! brute-force cosine similarity.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

use super::{rank, SearchFilter, StoreStats, VectorStore};
use crate::config::{is_collection_name, StoreConfig};
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{NotesError, Result};
use crate::models::{EmbeddedChunk, ScoredChunk};

pub struct SqliteStore {
    pool: SqlitePool,
    url: String,
    collection: String,
    read_only: bool,
}

impl SqliteStore {
    /// Build the store without touching the database.
    pub fn connect_lazy(config: &StoreConfig) -> Result<Self> {
        check_collection_name(&config.collection)?;
        Ok(Self {
            pool: db::lazy_pool(config)?,
            url: config.url.clone(),
            collection: config.collection.clone(),
            read_only: false,
        })
    }

    /// Open an existing database without ever writing to it.
    ///
    /// `ensure_collection` only verifies dimensions, and a collection that
    /// was never created reads as empty. Writes fail at the database.
    pub fn connect_read_only(config: &StoreConfig) -> Result<Self> {
        check_collection_name(&config.collection)?;
        Ok(Self {
            pool: db::lazy_read_only_pool(config)?,
            url: config.url.clone(),
            collection: config.collection.clone(),
            read_only: true,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Quoted table name; collection names may collide with SQL keywords.
    fn table(&self) -> String {
        format!("\"{}\"", self.collection)
    }

    fn err(&self, e: sqlx::Error) -> NotesError {
        let unreachable = match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => true,
            // SQLITE_CANTOPEN
            sqlx::Error::Database(db) => db.code().as_deref() == Some("14"),
            _ => false,
        };
        if unreachable {
            NotesError::StoreUnreachable {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        } else {
            NotesError::Store {
                collection: self.collection.clone(),
                reason: e.to_string(),
            }
        }
    }

    async fn insert_chunks(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        chunks: &[EmbeddedChunk],
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let sql = format!(
            r#"
            INSERT INTO {table} (id, note_path, fingerprint, ordinal, title, note_date,
                                 date_inferred, attendees, has_action_items,
                                 has_open_action_items, text, embedding, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                note_path = excluded.note_path,
                fingerprint = excluded.fingerprint,
                ordinal = excluded.ordinal,
                title = excluded.title,
                note_date = excluded.note_date,
                date_inferred = excluded.date_inferred,
                attendees = excluded.attendees,
                has_action_items = excluded.has_action_items,
                has_open_action_items = excluded.has_open_action_items,
                text = excluded.text,
                embedding = excluded.embedding,
                indexed_at = excluded.indexed_at
            "#,
            table = self.table()
        );

        for ec in chunks {
            let meta = &ec.chunk.metadata;
            let attendees = serde_json::to_string(&meta.attendees).unwrap_or_else(|_| "[]".into());
            sqlx::query(&sql)
                .bind(ec.chunk.id.key())
                .bind(&meta.note_path)
                .bind(&meta.fingerprint)
                .bind(meta.ordinal as i64)
                .bind(&meta.title)
                .bind(meta.date.map(|d| d.format("%Y-%m-%d").to_string()))
                .bind(meta.date_inferred)
                .bind(attendees)
                .bind(meta.has_action_items)
                .bind(meta.has_open_action_items)
                .bind(&ec.chunk.text)
                .bind(vec_to_blob(&ec.vector))
                .bind(&now)
                .execute(&mut **tx)
                .await
                .map_err(|e| self.err(e))?;
        }
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| self.err(e))?;
        Ok(found.is_some())
    }

    async fn registered_dims(&self) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(&self.collection)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err(e))?;
        Ok(dims.map(|d| d as usize))
    }

    async fn check_dims(&self, len: usize) -> Result<()> {
        match self.registered_dims().await? {
            Some(stored) if stored != len => Err(NotesError::DimensionMismatch {
                collection: self.collection.clone(),
                expected: stored,
                actual: len,
            }),
            _ => Ok(()),
        }
    }
}

fn check_collection_name(name: &str) -> Result<()> {
    if is_collection_name(name) {
        Ok(())
    } else {
        Err(NotesError::invalid_config(
            "store.collection",
            format!("'{}' is not a plain SQL identifier or is reserved", name),
        ))
    }
}

fn row_to_scored(row: &SqliteRow, query: &[f32]) -> std::result::Result<ScoredChunk, sqlx::Error> {
    let blob: Vec<u8> = row.try_get("embedding")?;
    let date: Option<String> = row.try_get("note_date")?;
    let attendees: String = row.try_get("attendees")?;
    let ordinal: i64 = row.try_get("ordinal")?;
    Ok(ScoredChunk {
        key: row.try_get("id")?,
        note_path: row.try_get("note_path")?,
        ordinal: ordinal as usize,
        fingerprint: row.try_get("fingerprint")?,
        title: row.try_get("title")?,
        date: date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        attendees: serde_json::from_str(&attendees).unwrap_or_default(),
        has_action_items: row.try_get("has_action_items")?,
        text: row.try_get("text")?,
        score: cosine_similarity(query, &blob_to_vec(&blob)),
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| NotesError::StoreUnreachable {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<()> {
        if self.read_only {
            if self.table_exists("collections").await? {
                self.check_dims(dims).await?;
            }
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(|e| self.err(e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dims INTEGER NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| self.err(e))?;

        let existing = sqlx::query("SELECT dims, model FROM collections WHERE name = ?")
            .bind(&self.collection)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;

        if let Some(row) = existing {
            let stored: i64 = row.try_get("dims").map_err(|e| self.err(e))?;
            let stored_model: String = row.try_get("model").map_err(|e| self.err(e))?;
            if stored as usize != dims {
                return Err(NotesError::DimensionMismatch {
                    collection: self.collection.clone(),
                    expected: stored as usize,
                    actual: dims,
                });
            }
            if stored_model != model {
                warn!(
                    collection = %self.collection,
                    stored = %stored_model,
                    configured = %model,
                    "Collection was built with a different embedding model; re-index to compare like with like"
                );
            }
        } else {
            sqlx::query("INSERT INTO collections (name, dims, model, created_at) VALUES (?, ?, ?, ?)")
                .bind(&self.collection)
                .bind(dims as i64)
                .bind(model)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(|e| self.err(e))?;
            info!(collection = %self.collection, dims, model, "Created collection");
        }

        let table = self.table();
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                note_path TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                title TEXT NOT NULL,
                note_date TEXT,
                date_inferred INTEGER NOT NULL DEFAULT 0,
                attendees TEXT NOT NULL DEFAULT '[]',
                has_action_items INTEGER NOT NULL DEFAULT 0,
                has_open_action_items INTEGER NOT NULL DEFAULT 0,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                indexed_at TEXT NOT NULL,
                UNIQUE(note_path, ordinal)
            )
            "#
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| self.err(e))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{}_note_path\" ON {table}(note_path)",
            self.collection
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| self.err(e))?;

        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(())
    }

    async fn stored_fingerprints(&self) -> Result<HashMap<String, String>> {
        if self.read_only && !self.table_exists(&self.collection).await? {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT note_path, MIN(fingerprint) AS lo, MAX(fingerprint) AS hi \
             FROM {} GROUP BY note_path",
            self.table()
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.err(e))?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let path: String = row.try_get("note_path").map_err(|e| self.err(e))?;
            let lo: String = row.try_get("lo").map_err(|e| self.err(e))?;
            let hi: String = row.try_get("hi").map_err(|e| self.err(e))?;
            out.insert(path, if lo == hi { lo } else { String::new() });
        }
        Ok(out)
    }

    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        if let Some(ec) = chunks.first() {
            self.check_dims(ec.vector.len()).await?;
        }
        let mut tx = self.pool.begin().await.map_err(|e| self.err(e))?;
        self.insert_chunks(&mut tx, chunks).await?;
        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(())
    }

    async fn replace_note(&self, note_path: &str, chunks: &[EmbeddedChunk]) -> Result<()> {
        if let Some(ec) = chunks.first() {
            self.check_dims(ec.vector.len()).await?;
        }
        let mut tx = self.pool.begin().await.map_err(|e| self.err(e))?;

        let deleted = sqlx::query(&format!("DELETE FROM {} WHERE note_path = ?", self.table()))
            .bind(note_path)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.err(e))?
            .rows_affected();

        self.insert_chunks(&mut tx, chunks).await?;
        tx.commit().await.map_err(|e| self.err(e))?;

        debug!(note = %note_path, deleted, inserted = chunks.len(), "Replaced note chunks");
        Ok(())
    }

    async fn delete_by_note_path(&self, note_path: &str) -> Result<usize> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE note_path = ?", self.table()))
            .bind(note_path)
            .execute(&self.pool)
            .await
            .map_err(|e| self.err(e))?;
        Ok(result.rows_affected() as usize)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        self.check_dims(query.len()).await?;

        let mut sql = format!(
            "SELECT id, note_path, fingerprint, ordinal, title, note_date, attendees, \
             has_action_items, text, embedding FROM {} WHERE 1 = 1",
            self.table()
        );
        let mut binds: Vec<String> = Vec::new();
        if let Some(path) = &filter.note_path {
            sql.push_str(" AND note_path = ?");
            binds.push(path.clone());
        }
        if let Some(date) = filter.date {
            sql.push_str(" AND note_date = ?");
            binds.push(date.format("%Y-%m-%d").to_string());
        }

        let mut q = sqlx::query(&sql);
        for value in &binds {
            q = q.bind(value);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(|e| self.err(e))?;

        // Title and attendee matching fold Unicode case, which SQLite's LOWER does not.
        let candidates = rows
            .iter()
            .map(|row| row_to_scored(row, query))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.err(e))?
            .into_iter()
            .filter(|c| filter.matches(&c.note_path, &c.title, c.date, &c.attendees))
            .collect();

        Ok(rank(candidates, k))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(DISTINCT note_path) AS notes, COUNT(*) AS chunks, \
             MAX(indexed_at) AS last_indexed FROM {}",
            self.table()
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| self.err(e))?;

        let registry = sqlx::query("SELECT dims, model FROM collections WHERE name = ?")
            .bind(&self.collection)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        let notes: i64 = row.try_get("notes").map_err(|e| self.err(e))?;
        let chunks: i64 = row.try_get("chunks").map_err(|e| self.err(e))?;
        let last_indexed: Option<String> = row.try_get("last_indexed").map_err(|e| self.err(e))?;

        let (dims, model) = match registry {
            Some(r) => {
                let dims: i64 = r.try_get("dims").map_err(|e| self.err(e))?;
                let model: String = r.try_get("model").map_err(|e| self.err(e))?;
                (Some(dims as usize), Some(model))
            }
            None => (None, None),
        };

        Ok(StoreStats {
            collection: self.collection.clone(),
            model,
            dims,
            notes: notes as usize,
            chunks: chunks as usize,
            last_indexed,
        })
    }
}
