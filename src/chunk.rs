//! Overlapping-window text chunker.
//!
//! Splits a parsed note body into [`Chunk`]s of at most `chunk_size` bytes.
//! Splitting prefers paragraph and heading boundaries; only blocks that are
//! too large on their own are hard-split, at a newline or space where one
//! exists. Every window after the first starts with a tail of the previous
//! window (at least `chunk_overlap` bytes, extended back to a word boundary)
//! so that facts straddling a boundary stay retrievable.
//!
//! Chunking is a pure function of the body text and the chunking settings:
//! the same note always yields the same boundaries and ordinals.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkId, ChunkMetadata, Note, ParsedNote};

/// Build the chunks of one single-meeting note. Always returns at least one chunk.
pub fn chunk_note(note: &Note, parsed: &ParsedNote, config: &ChunkingConfig) -> Vec<Chunk> {
    chunk_meetings(note, std::slice::from_ref(parsed), config)
}

/// Build the chunks of a note holding one or more meetings.
///
/// Each meeting is windowed on its own and its chunks carry that meeting's
/// title, date and attendees. Ordinals run on across meetings, so chunk
/// identity stays `(note path, ordinal)`. Always returns at least one chunk.
pub fn chunk_meetings(note: &Note, meetings: &[ParsedNote], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for parsed in meetings {
        let has_open_action_items = parsed.action_items.iter().any(|a| !a.done);
        for text in split_windows(&parsed.body, config.chunk_size, config.chunk_overlap) {
            if text.is_empty() && meetings.len() > 1 {
                continue;
            }
            let ordinal = chunks.len();
            let has_action_items = parsed
                .action_items
                .iter()
                .any(|a| !a.task.is_empty() && text.contains(&a.task));
            chunks.push(Chunk {
                id: ChunkId::new(&note.path, ordinal),
                metadata: ChunkMetadata {
                    note_path: note.path.clone(),
                    fingerprint: note.fingerprint.clone(),
                    ordinal,
                    title: parsed.title.clone(),
                    date: parsed.date,
                    date_inferred: parsed.date_inferred(),
                    attendees: parsed.attendees.clone(),
                    has_action_items,
                    has_open_action_items,
                },
                text,
            });
        }
    }
    if chunks.is_empty() {
        if let Some(first) = meetings.first() {
            return chunk_meetings(note, std::slice::from_ref(first), config);
        }
    }
    chunks
}

/// Split text into overlapping windows. Returns at least one (possibly empty) window.
pub fn split_windows(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    // Worst case a window holds a full overlap tail, the separator, and one block.
    let block_budget = chunk_size
        .saturating_sub(2 * overlap + 2)
        .max(1);

    let mut windows = Vec::new();
    let mut current = String::new();

    for block in blocks(text, block_budget) {
        if current.is_empty() {
            current = block;
            continue;
        }
        if current.len() + 2 + block.len() <= chunk_size {
            current.push_str("\n\n");
            current.push_str(&block);
            continue;
        }

        let tail = overlap_tail(&current, overlap).to_string();
        windows.push(std::mem::take(&mut current));
        if !tail.is_empty() {
            current.push_str(&tail);
            current.push_str("\n\n");
        }
        current.push_str(&block);
    }

    if !current.is_empty() || windows.is_empty() {
        windows.push(current);
    }
    windows
}

/// Paragraph blocks, with each heading starting a new block and oversized
/// blocks hard-split to `budget` bytes.
fn blocks(text: &str, budget: usize) -> Vec<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.trim_start().starts_with('#') && !current.is_empty() {
            paragraphs.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line.trim_end());
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    let mut out = Vec::new();
    for para in paragraphs {
        if para.len() <= budget {
            out.push(para);
        } else {
            hard_split(&para, budget, &mut out);
        }
    }
    out
}

fn hard_split(text: &str, budget: usize, out: &mut Vec<String>) {
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut split_at = snap_to_char_boundary(remaining, remaining.len().min(budget));
        if split_at == 0 {
            // A single character wider than the budget.
            split_at = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .map(|pos| pos + 1)
                .filter(|pos| *pos > 0)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
}

/// The last `overlap` bytes of `text`, extended back to the start of a word
/// as long as the tail stays within `2 * overlap` bytes.
fn overlap_tail(text: &str, overlap: usize) -> &str {
    if overlap == 0 {
        return "";
    }
    if text.len() <= overlap {
        return text.trim_start();
    }
    let start = snap_to_char_boundary(text, text.len() - overlap);
    let floor = text.len().saturating_sub(2 * overlap);
    let word_start = text[..start]
        .rfind(char::is_whitespace)
        .map(|pos| pos + 1)
        .filter(|pos| *pos >= floor);
    let start = match word_start {
        Some(pos) => snap_to_char_boundary(text, pos),
        None => start,
    };
    text[start..].trim_start()
}

fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;
    use crate::models::{ActionItem, DateSource};
    use crate::parser::NoteParser;
    use chrono::{NaiveDate, Utc};

    fn note(path: &str, body: &str) -> (Note, ParsedNote) {
        let note = Note {
            path: path.to_string(),
            content: body.to_string(),
            modified_at: Utc::now(),
            fingerprint: "abc".to_string(),
        };
        let parsed = ParsedNote {
            title: "Sync".to_string(),
            title_from_file_name: false,
            date: NaiveDate::from_ymd_opt(2025, 9, 17),
            date_source: DateSource::Metadata,
            attendees: vec!["Alice".to_string()],
            action_items: vec![ActionItem {
                task: "Ship the fix".to_string(),
                due: None,
                done: false,
            }],
            body: body.to_string(),
            warnings: Vec::new(),
        };
        (note, parsed)
    }

    #[test]
    fn test_small_text_single_window() {
        let windows = split_windows("Hello, world!", 750, 100);
        assert_eq!(windows, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_one_window() {
        let windows = split_windows("", 750, 100);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0], "");
    }

    #[test]
    fn test_windows_respect_chunk_size() {
        let text = (0..60)
            .map(|i| format!("Paragraph number {} talks about the rollout.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        for window in split_windows(&text, 200, 40) {
            assert!(window.len() <= 200, "window too large: {}", window.len());
        }
    }

    #[test]
    fn test_consecutive_windows_overlap() {
        let text = (0..20)
            .map(|i| format!("Sentence {} about the payment service migration.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let windows = split_windows(&text, 200, 40);
        assert!(windows.len() > 1);
        for pair in windows.windows(2) {
            let tail = overlap_tail(&pair[0], 40);
            assert!(tail.len() >= 40 || tail == pair[0].trim_start());
            assert!(pair[1].starts_with(tail), "{:?} / {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_zero_overlap_partitions_text() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let windows = split_windows(text, 12, 0);
        assert_eq!(windows, vec!["Alpha\n\nBeta", "Gamma\n\nDelta"]);
    }

    #[test]
    fn test_headings_start_new_blocks() {
        let text = "intro line\n## Decisions\n- ship it";
        let blocks = blocks(text, 100);
        assert_eq!(blocks, vec!["intro line", "## Decisions\n- ship it"]);
    }

    #[test]
    fn test_oversized_block_hard_split_on_spaces() {
        let text = "word ".repeat(100);
        let windows = split_windows(text.trim(), 60, 10);
        assert!(windows.len() > 1);
        for window in &windows {
            assert!(window.len() <= 60);
            assert!(!window.contains("wor d"));
        }
    }

    #[test]
    fn test_multibyte_text_is_split_safely() {
        let text = "äöü ".repeat(200);
        let windows = split_windows(&text, 50, 5);
        assert!(windows.len() > 1);
        assert!(windows.iter().all(|w| w.len() <= 50));
    }

    #[test]
    fn test_no_overlap_only_window() {
        let text = "A long enough paragraph to fill the first window completely.\n\nB";
        let windows = split_windows(text, 64, 10);
        let last = windows.last().unwrap();
        assert!(last.ends_with('B'));
    }

    #[test]
    fn test_chunk_note_ordinals_and_metadata() {
        let body = (0..30)
            .map(|i| format!("Point {}: we agreed to Ship the fix on Friday.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let (n, p) = note("team/sync.md", &body);
        let config = ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 30,
        };
        let chunks = chunk_note(&n, &p, &config);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.id.ordinal, i);
            assert_eq!(c.id.note_path, "team/sync.md");
            assert_eq!(c.metadata.fingerprint, "abc");
            assert!(c.metadata.has_action_items);
            assert!(c.metadata.has_open_action_items);
            assert!(!c.metadata.date_inferred);
        }
    }

    #[test]
    fn test_meetings_keep_their_own_metadata_and_shared_ordinals() {
        let (n, first) = note("diary.md", "Standup notes.");
        let second = ParsedNote {
            title: "Design review".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, 18),
            attendees: vec!["Carol".to_string()],
            action_items: Vec::new(),
            body: "Review notes.".to_string(),
            ..first.clone()
        };
        let empty = ParsedNote {
            body: String::new(),
            ..second.clone()
        };
        let chunks = chunk_meetings(&n, &[first, empty, second], &ChunkingConfig::default());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, ChunkId::new("diary.md", 0));
        assert_eq!(chunks[0].metadata.title, "Sync");
        assert!(chunks[0].metadata.has_open_action_items);
        assert_eq!(chunks[1].id, ChunkId::new("diary.md", 1));
        assert_eq!(chunks[1].text, "Review notes.");
        assert_eq!(chunks[1].metadata.title, "Design review");
        assert_eq!(chunks[1].metadata.date, NaiveDate::from_ymd_opt(2025, 9, 18));
        assert_eq!(chunks[1].metadata.attendees, vec!["Carol".to_string()]);
        assert!(!chunks[1].metadata.has_open_action_items);
    }

    #[test]
    fn test_emphasised_action_item_is_flagged() {
        let content = "# Sync\n\nIntro paragraph about nothing in particular.\n\n\
                       ## Action Items\n- [ ] Ship the **release notes**\n";
        let parser = NoteParser::new(&ParserConfig::default()).unwrap();
        let parsed = parser.parse("sync.md", content, Utc::now());
        assert_eq!(parsed.action_items[0].task, "Ship the **release notes");

        let (n, _) = note("sync.md", content);
        let config = ChunkingConfig {
            chunk_size: 60,
            chunk_overlap: 0,
        };
        let chunks = chunk_note(&n, &parsed, &config);
        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].metadata.has_action_items);
        assert!(chunks[1].metadata.has_action_items);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let body = "Alpha\n\nBeta\n\n## Gamma\nDelta\n\nEpsilon ".repeat(20);
        let (n, p) = note("a.md", &body);
        let config = ChunkingConfig {
            chunk_size: 120,
            chunk_overlap: 20,
        };
        assert_eq!(chunk_note(&n, &p, &config), chunk_note(&n, &p, &config));
    }
}
