//! Change detection between the notes on disk and the indexed state.
//!
//! The store's recorded fingerprint per note path is the only index state.
//! Classification compares content fingerprints and nothing else; file
//! modification times are never consulted.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::Note;

/// SHA-256 hex digest of raw note content.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    New,
    Modified,
    Unchanged,
    Deleted,
}

/// Note paths grouped by [`ChangeKind`], each list sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn kind_of(&self, path: &str) -> Option<ChangeKind> {
        let has = |list: &Vec<String>| list.binary_search_by(|p| p.as_str().cmp(path)).is_ok();
        if has(&self.new) {
            Some(ChangeKind::New)
        } else if has(&self.modified) {
            Some(ChangeKind::Modified)
        } else if has(&self.unchanged) {
            Some(ChangeKind::Unchanged)
        } else if has(&self.deleted) {
            Some(ChangeKind::Deleted)
        } else {
            None
        }
    }

    /// Paths that need parsing and embedding.
    pub fn delta(&self) -> impl Iterator<Item = &String> {
        self.new.iter().chain(self.modified.iter())
    }

    pub fn is_noop(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Classify every note path seen on disk or in the store.
///
/// `unreadable` lists files or directories that exist on disk but could not
/// be read this run; notes at or below them are neither indexed nor treated
/// as deleted.
pub fn classify(
    on_disk: &[Note],
    stored: &HashMap<String, String>,
    unreadable: &[String],
) -> ChangeSet {
    let mut set = ChangeSet::default();
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    for note in on_disk {
        seen.insert(note.path.as_str());
        match stored.get(&note.path) {
            None => set.new.push(note.path.clone()),
            Some(fp) if *fp == note.fingerprint => set.unchanged.push(note.path.clone()),
            Some(_) => set.modified.push(note.path.clone()),
        }
    }
    for path in stored.keys() {
        if !seen.contains(path.as_str()) && !is_shielded(path, unreadable) {
            set.deleted.push(path.clone());
        }
    }

    set.new.sort();
    set.modified.sort();
    set.unchanged.sort();
    set.deleted.sort();
    set
}

/// Whether `path` is, or lies under, an entry that could not be read.
fn is_shielded(path: &str, unreadable: &[String]) -> bool {
    unreadable.iter().any(|u| match path.strip_prefix(u.as_str()) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    })
}
