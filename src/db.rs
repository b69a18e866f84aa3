//! SQLite connection handling.
//!
//! `store.url` is a `sqlite:` URL. The database file and its parent
//! directory are created on first connect; the journal runs in WAL mode so
//! queries can read while an index run writes.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::StoreConfig;
use crate::error::{NotesError, Result};

fn parse_url(url: &str) -> Result<SqliteConnectOptions> {
    if !url.starts_with("sqlite:") {
        return Err(NotesError::invalid_config(
            "store.url",
            format!("'{}' is not a sqlite: URL", url),
        ));
    }
    SqliteConnectOptions::from_str(url)
        .map_err(|e| NotesError::invalid_config("store.url", e.to_string()))
}

pub fn connect_options(url: &str) -> Result<SqliteConnectOptions> {
    Ok(parse_url(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5)))
}

/// Options that never create, convert or write the database.
pub fn read_only_options(url: &str) -> Result<SqliteConnectOptions> {
    Ok(parse_url(url)?
        .create_if_missing(false)
        .read_only(true)
        .busy_timeout(Duration::from_secs(5)))
}

/// Whether the database behind `url` already exists on disk.
pub fn database_exists(url: &str) -> bool {
    database_path(url).map(|p| p.is_file()).unwrap_or(false)
}

/// Filesystem path of the database, if the URL names a file.
pub fn database_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

fn ensure_parent_dir(url: &str) -> Result<()> {
    if let Some(parent) = database_path(url).and_then(|p| p.parent().map(|p| p.to_path_buf())) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(&parent).map_err(|source| NotesError::Io {
                path: parent.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Pool that opens its first connection on first use.
pub fn lazy_pool(config: &StoreConfig) -> Result<SqlitePool> {
    let options = connect_options(&config.url)?;
    ensure_parent_dir(&config.url)?;
    Ok(SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy_with(options))
}

/// Lazy pool over an existing database, opened read-only.
pub fn lazy_read_only_pool(config: &StoreConfig) -> Result<SqlitePool> {
    let options = read_only_options(&config.url)?;
    Ok(SqlitePoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy_with(options))
}

/// Pool with one connection established up front.
pub async fn connect(config: &StoreConfig) -> Result<SqlitePool> {
    let options = connect_options(&config.url)?;
    ensure_parent_dir(&config.url)?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .map_err(|e| NotesError::StoreUnreachable {
            url: config.url.clone(),
            reason: e.to_string(),
        })
}
