//! Notes directory discovery.
//!
//! Walks the configured notes directory, applies include/exclude globs to
//! paths relative to it, and reads every matching file into a [`Note`] with
//! its content fingerprint. Hidden files and directories are never entered.
//! With `notes.recursive = false` only the top level is scanned.

use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::change::fingerprint;
use crate::config::NotesConfig;
use crate::error::{NotesError, Result};
use crate::models::{Note, NoteWarning};

/// Everything one scan found.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Readable notes, sorted by path.
    pub notes: Vec<Note>,
    /// Relative paths of files or directories that exist but could not be read.
    pub unreadable: Vec<String>,
    pub warnings: Vec<NoteWarning>,
    pub recursive: bool,
}

pub fn scan_notes(config: &NotesConfig) -> Result<ScanOutcome> {
    let root = &config.dir;
    if !root.is_dir() {
        return Err(NotesError::Io {
            path: root.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "notes directory does not exist",
            ),
        });
    }

    let include_set = build_globset("notes.include_globs", &config.include_globs)?;
    let exclude_set = build_globset("notes.exclude_globs", &config.exclude_globs)?;

    let mut outcome = ScanOutcome {
        recursive: config.recursive,
        ..ScanOutcome::default()
    };

    let mut walker = WalkDir::new(root).follow_links(false);
    if !config.recursive {
        walker = walker.max_depth(1);
    }

    for entry in walker.into_iter().filter_entry(|e| !is_hidden(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                // An unreadable root would make every indexed note look deleted.
                if err.depth() == 0 {
                    return Err(NotesError::Io {
                        path: root.clone(),
                        source: err
                            .into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("cannot read notes directory")),
                    });
                }
                let rel = err
                    .path()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(relative_key);
                warn!(path = ?rel, error = %err, "Skipping unreadable entry");
                if let Some(rel) = rel.filter(|r| !r.is_empty()) {
                    outcome.unreadable.push(rel);
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel = relative_key(path.strip_prefix(root).unwrap_or(path));

        if exclude_set.is_match(&rel) || !include_set.is_match(&rel) {
            continue;
        }

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %rel, error = %err, "Cannot read note");
                outcome.unreadable.push(rel);
                continue;
            }
        };

        let modified_at = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);

        let fp = fingerprint(&bytes);
        let content = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                let reason = "invalid UTF-8; undecodable bytes replaced";
                warn!(path = %rel, "{}", reason);
                outcome.warnings.push(NoteWarning::new(&rel, reason));
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
        };

        debug!(path = %rel, "Found note");
        outcome.notes.push(Note {
            path: rel,
            content,
            modified_at,
            fingerprint: fp,
        });
    }

    outcome.notes.sort_by(|a, b| a.path.cmp(&b.path));
    outcome.unreadable.sort();
    Ok(outcome)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// `/`-separated relative path used as the note key.
fn relative_key(path: &std::path::Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(key: &str, patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(false)
            .build()
            .map_err(|e| NotesError::invalid_config(key, e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| NotesError::invalid_config(key, e.to_string()))
}
