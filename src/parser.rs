//! Meeting-note parser.
//!
//! Turns raw Markdown into a [`ParsedNote`]: title, date, attendees, action
//! items, and the body text that gets chunked. Recognition is driven by
//! [`ParserConfig`] so that different note-taking conventions can be
//! supported without code changes.
//!
//! # Recognized structure
//!
//! ```text
//! # Sprint Planning                      <- title (first top-level heading)
//! **Date:** 2025-09-17                   <- metadata line (date labels)
//! **Attendees:** Alice, Bob              <- metadata line (attendee labels)
//!
//! ## Notes
//! - discussed the payment rollout
//!
//! ## Action Items                        <- section heading (action labels)
//! - [ ] Draft rollback plan | 2025-09-20
//! ```
//!
//! Parsing never fails. Anything that cannot be recognized stays in the body
//! as plain text and a warning is recorded on the result.
//!
//! # Meeting diaries
//!
//! One file may log several meetings, each under its own level-2 heading:
//!
//! ```text
//! # Team diary
//!
//! ## Standup                             <- meeting: has its own date line
//! Date: 2025-09-01
//! Attendees: Alice
//!
//! ## Meeting Title: Design review        <- meeting: title label in heading
//! Date: 2025-09-03
//! ```
//!
//! [`NoteParser::parse_meetings`] splits such a file into one [`ParsedNote`]
//! per meeting.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

use crate::config::ParserConfig;
use crate::error::{NotesError, Result};
use crate::models::{ActionItem, DateSource, ParsedNote};

struct Line<'a> {
    text: &'a str,
    in_fence: bool,
}

/// Compiled recognizer for one [`ParserConfig`].
pub struct NoteParser {
    date_formats: Vec<String>,
    title_heading: Regex,
    section_heading: Regex,
    any_heading: Regex,
    title_meta: Regex,
    date_meta: Regex,
    attendee_meta: Regex,
    attendee_section: Regex,
    action_section: Regex,
    action_tag: Option<Regex>,
    bullet: Regex,
    checkbox: Regex,
    date_token: Regex,
    due_paren: Regex,
    due_suffix: Regex,
}

impl NoteParser {
    pub fn new(config: &ParserConfig) -> Result<Self> {
        let compile = |key: &str, pattern: String| {
            Regex::new(&pattern).map_err(|e| NotesError::invalid_config(key, e.to_string()))
        };

        let action_tag = if config.action_tags.is_empty() {
            None
        } else {
            Some(compile(
                "parser.action_tags",
                format!(
                    r"(?i)^\s*[-*+]\s+(?:{})\s*(.+)$",
                    alternation(&config.action_tags)
                ),
            )?)
        };

        Ok(Self {
            date_formats: config.date_formats.clone(),
            title_heading: compile("parser", r"^#\s+(.+?)\s*#*\s*$".to_string())?,
            section_heading: compile("parser", r"^##\s+(.+?)\s*#*\s*$".to_string())?,
            any_heading: compile("parser", r"^#{1,6}\s".to_string())?,
            title_meta: compile("parser.title_labels", meta_pattern(&config.title_labels))?,
            date_meta: compile("parser.date_labels", meta_pattern(&config.date_labels))?,
            attendee_meta: compile(
                "parser.attendee_labels",
                meta_pattern(&config.attendee_labels),
            )?,
            attendee_section: compile(
                "parser.attendee_labels",
                section_pattern(&config.attendee_labels),
            )?,
            action_section: compile(
                "parser.action_labels",
                section_pattern(&config.action_labels),
            )?,
            action_tag,
            bullet: compile("parser", r"^\s*[-*+]\s+(.*?)\s*$".to_string())?,
            checkbox: compile("parser", r"^\[([ xX])\]\s*(.*)$".to_string())?,
            date_token: compile(
                "parser",
                r"(?:^|[^\d])(\d{4})[-/_.](\d{1,2})[-/_.](\d{1,2})(?:[^\d]|$)".to_string(),
            )?,
            due_paren: compile("parser", r"(?i)_?\(\s*due:?\s*([^)]*)\)_?".to_string())?,
            due_suffix: compile("parser", r"(?i)\s+_?due:?\s+(.+?)_?$".to_string())?,
        })
    }

    /// Parse one note. `path` is the note key, used for the file-name fallbacks.
    pub fn parse(&self, path: &str, content: &str, modified_at: DateTime<Utc>) -> ParsedNote {
        let mut warnings = Vec::new();
        let lines = split_lines(content, &mut warnings);
        let mut consumed = vec![false; lines.len()];

        // Title
        let mut title = None;
        if let Some((idx, caps)) = self.first_match(&lines, &self.title_heading) {
            title = Some(caps);
            consumed[idx] = true;
        } else if let Some((idx, value)) = self.first_match(&lines, &self.title_meta) {
            if !value.is_empty() {
                title = Some(value);
            }
            consumed[idx] = true;
        }
        let title_from_file_name = title.is_none();
        let title = title.unwrap_or_else(|| {
            warnings.push("no title heading; using file name".to_string());
            file_stem(path)
        });

        // Date
        let mut date = None;
        let mut date_source = DateSource::Modified;
        if let Some((idx, value)) = self.first_match(&lines, &self.date_meta) {
            consumed[idx] = true;
            match self.parse_date(&value) {
                Some(d) => {
                    date = Some(d);
                    date_source = DateSource::Metadata;
                }
                None if !value.is_empty() => {
                    warnings.push(format!("unparseable date '{}'", value));
                }
                None => {}
            }
        }
        if date.is_none() {
            if let Some(d) = self.find_date_token(&title) {
                date = Some(d);
                date_source = DateSource::Title;
            } else if let Some(d) = self.find_date_token(&file_stem(path)) {
                date = Some(d);
                date_source = DateSource::FileName;
            } else {
                date = Some(modified_at.date_naive());
                date_source = DateSource::Modified;
            }
        }

        // Attendees
        let mut attendees = Vec::new();
        if let Some((idx, value)) = self.first_match(&lines, &self.attendee_meta) {
            consumed[idx] = true;
            attendees = split_names(&value);
        }
        if attendees.is_empty() {
            if let Some(items) = self.section_items(&lines, &self.attendee_section) {
                attendees = items.iter().flat_map(|item| split_names(item)).collect();
            }
        }
        dedup_in_order(&mut attendees);

        // Action items
        let action_items = match self.section_items(&lines, &self.action_section) {
            Some(items) => items
                .iter()
                .map(|item| self.action_item(item))
                .filter(|a| !a.task.is_empty())
                .collect(),
            None => self.tagged_action_items(&lines),
        };

        let body = lines
            .iter()
            .zip(consumed.iter())
            .filter(|(_, used)| !**used)
            .map(|(line, _)| line.text)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        ParsedNote {
            title,
            title_from_file_name,
            date,
            date_source,
            attendees,
            action_items,
            body,
            warnings,
        }
    }

    /// Parse a file that may log several meetings.
    ///
    /// The file is a diary when at least two level-2 sections are meetings,
    /// that is, they carry their own date line or their heading starts with
    /// a title label (`## Meeting Title: ...`). Each meeting section is
    /// parsed on its own with the heading as its title; level-2 sections
    /// that are not meetings stay with the meeting above them. Text before
    /// the first meeting is kept as one more meeting when it has a body.
    /// Meetings with neither body text nor action items are skipped.
    ///
    /// Any other file is a single meeting, exactly as [`parse`](Self::parse).
    /// Always returns at least one record.
    pub fn parse_meetings(
        &self,
        path: &str,
        content: &str,
        modified_at: DateTime<Utc>,
    ) -> Vec<ParsedNote> {
        let lines = split_lines(content, &mut Vec::new());
        let headings: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.in_fence && self.section_heading.is_match(l.text))
            .map(|(idx, _)| idx)
            .collect();

        let meeting_starts: Vec<usize> = headings
            .iter()
            .enumerate()
            .filter(|&(n, &start)| {
                let end = headings.get(n + 1).copied().unwrap_or(lines.len());
                self.is_meeting_section(&lines[start..end])
            })
            .map(|(_, &start)| start)
            .collect();

        if meeting_starts.len() < 2 {
            return vec![self.parse(path, content, modified_at)];
        }

        let mut meetings = Vec::new();
        let preamble = join_lines(&lines[..meeting_starts[0]]);
        let preamble = self.parse(path, &preamble, modified_at);
        if has_content(&preamble) {
            meetings.push(preamble);
        }

        for (n, &start) in meeting_starts.iter().enumerate() {
            let end = meeting_starts.get(n + 1).copied().unwrap_or(lines.len());
            let heading = self
                .section_heading
                .captures(lines[start].text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
                .unwrap_or("");
            let title = match self.title_meta.captures(heading) {
                Some(caps) => clean_value(caps.get(1).map(|m| m.as_str()).unwrap_or("")),
                None => clean_value(heading),
            };
            let section = format!("# {}\n{}", title, join_lines(&lines[start + 1..end]));
            let parsed = self.parse(path, &section, modified_at);
            if has_content(&parsed) {
                meetings.push(parsed);
            }
        }

        if meetings.is_empty() {
            meetings.push(self.parse(path, content, modified_at));
        }
        meetings
    }

    fn is_meeting_section(&self, section: &[Line]) -> bool {
        let heading = self
            .section_heading
            .captures(section[0].text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or("");
        self.title_meta.is_match(heading)
            || section[1..]
                .iter()
                .any(|l| !l.in_fence && self.date_meta.is_match(l.text))
    }

    /// First line outside code fences matching `re`; returns its index and capture 1.
    fn first_match(&self, lines: &[Line], re: &Regex) -> Option<(usize, String)> {
        lines.iter().enumerate().find_map(|(idx, line)| {
            if line.in_fence {
                return None;
            }
            re.captures(line.text).map(|caps| {
                let value = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                (idx, clean_value(value))
            })
        })
    }

    /// Bullet items under the first heading matching `heading`.
    ///
    /// Collection stops at the next heading or the first non-bullet,
    /// non-blank line. Returns `None` when no such section has items.
    fn section_items(&self, lines: &[Line], heading: &Regex) -> Option<Vec<String>> {
        let start = lines
            .iter()
            .position(|l| !l.in_fence && heading.is_match(l.text))?;

        let mut items = Vec::new();
        for line in &lines[start + 1..] {
            if line.in_fence || self.any_heading.is_match(line.text) {
                break;
            }
            if let Some(caps) = self.bullet.captures(line.text) {
                let item = caps.get(1).map(|m| m.as_str()).unwrap_or("").trim();
                if !item.is_empty() {
                    items.push(item.to_string());
                }
            } else if line.text.trim().is_empty() {
                continue;
            } else {
                break;
            }
        }

        if items.is_empty() {
            None
        } else {
            Some(items)
        }
    }

    /// Checkbox bullets and tag-prefixed bullets anywhere in the note.
    fn tagged_action_items(&self, lines: &[Line]) -> Vec<ActionItem> {
        let mut items = Vec::new();
        for line in lines.iter().filter(|l| !l.in_fence) {
            if let Some(caps) = self.bullet.captures(line.text) {
                let content = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                if self.checkbox.is_match(content) {
                    items.push(self.action_item(content));
                    continue;
                }
            }
            if let Some(tag_re) = &self.action_tag {
                if let Some(caps) = tag_re.captures(line.text) {
                    let content = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                    items.push(self.action_item(content));
                }
            }
        }
        items.retain(|a| !a.task.is_empty());
        items
    }

    fn action_item(&self, raw: &str) -> ActionItem {
        let mut text = raw.trim().to_string();
        let mut done = false;
        if let Some(caps) = self.checkbox.captures(&text) {
            done = caps.get(1).map(|m| m.as_str() != " ").unwrap_or(false);
            text = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
        }

        let (task, due) = if let Some((task, due)) = text.split_once('|') {
            (task.to_string(), Some(due.to_string()))
        } else if let Some(caps) = self.due_paren.captures(&text) {
            let due = caps.get(1).map(|m| m.as_str().to_string());
            let start = caps.get(0).map(|m| m.start()).unwrap_or(text.len());
            (text[..start].to_string(), due)
        } else if let Some(caps) = self.due_suffix.captures(&text) {
            let due = caps.get(1).map(|m| m.as_str().to_string());
            let start = caps.get(0).map(|m| m.start()).unwrap_or(text.len());
            (text[..start].to_string(), due)
        } else {
            (text.clone(), None)
        };

        let due = due
            .map(|d| clean_value(&d))
            .filter(|d| !d.is_empty());

        ActionItem {
            task: clean_value(&task),
            due,
            done,
        }
    }

    fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        let value = clean_value(value);
        for fmt in &self.date_formats {
            if let Ok(d) = NaiveDate::parse_from_str(&value, fmt) {
                return Some(d);
            }
        }
        self.find_date_token(&value)
    }

    fn find_date_token(&self, text: &str) -> Option<NaiveDate> {
        self.date_token.captures_iter(text).find_map(|caps| {
            let y = caps.get(1)?.as_str().parse().ok()?;
            let m = caps.get(2)?.as_str().parse().ok()?;
            let d = caps.get(3)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(y, m, d)
        })
    }
}

fn alternation(labels: &[String]) -> String {
    labels
        .iter()
        .map(|l| regex::escape(l.trim()))
        .collect::<Vec<_>>()
        .join("|")
}

/// `Label: value`, `**Label:** value`, `**Label**: value`, `- Label: value`.
fn meta_pattern(labels: &[String]) -> String {
    format!(
        r"(?i)^\s*(?:[-*+]\s+)?(?:\*\*|__)?\s*(?:{})\s*(?:\*\*|__)?\s*:\s*(?:\*\*|__)?\s*(.*?)\s*$",
        alternation(labels)
    )
}

/// `## Label` or `### Label:` on a line of its own.
fn section_pattern(labels: &[String]) -> String {
    format!(r"(?i)^#{{1,6}}\s*(?:{})\s*:?\s*$", alternation(labels))
}

fn split_lines<'a>(content: &'a str, warnings: &mut Vec<String>) -> Vec<Line<'a>> {
    let mut lines = Vec::new();
    let mut in_fence = false;
    for text in content.lines() {
        let trimmed = text.trim_start();
        let fence = trimmed.starts_with("```") || trimmed.starts_with("~~~");
        if fence {
            lines.push(Line {
                text,
                in_fence: true,
            });
            in_fence = !in_fence;
            continue;
        }
        lines.push(Line { text, in_fence });
    }
    if in_fence {
        warnings.push("unterminated code fence; treated as plain text".to_string());
    }
    lines
}

fn join_lines(lines: &[Line]) -> String {
    lines.iter().map(|l| l.text).collect::<Vec<_>>().join("\n")
}

fn has_content(parsed: &ParsedNote) -> bool {
    !parsed.body.is_empty() || !parsed.action_items.is_empty()
}

fn clean_value(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '*' || c == '_')
        .trim()
        .to_string()
}

fn split_names(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(clean_value)
        .filter(|s| !s.is_empty())
        .collect()
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.to_lowercase()));
}

fn file_stem(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(pos) if pos > 0 => name[..pos].to_string(),
        _ => name.to_string(),
    }
}
