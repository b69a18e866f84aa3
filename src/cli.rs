//! Implementations of the `notes` subcommands.
//!
//! Each `run_*` function prints its result on stdout in plain text. Progress
//! and logs go to stderr. Errors are returned to `main`, which prints the
//! error kind and exits non-zero.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::NaiveDate;

use crate::config::Config;
use crate::error::NotesError;
use crate::health;
use crate::indexer::IndexReport;
use crate::models::{QueryResult, ScoredChunk};
use crate::progress::ProgressReporter;
use crate::session::Session;
use crate::store::SearchFilter;

/// Metadata filter flags shared by `search` and `ask`.
pub fn build_filter(
    attendee: Option<String>,
    date: Option<String>,
    title: Option<String>,
) -> Result<SearchFilter> {
    let date = match date {
        Some(d) => match NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d") {
            Ok(parsed) => Some(parsed),
            Err(_) => bail!("--date must be YYYY-MM-DD, got '{}'", d),
        },
        None => None,
    };
    Ok(SearchFilter {
        note_path: None,
        attendee: attendee.filter(|a| !a.trim().is_empty()),
        date,
        title: title.filter(|t| !t.trim().is_empty()),
    })
}

/// Create the store and the collection. Idempotent.
pub async fn run_init(config: Config) -> Result<()> {
    let session = Session::open(config).await?;
    let stats = session.stats().await?;
    println!(
        "Collection '{}' ready ({} dims, model {}).",
        stats.collection,
        stats.dims.unwrap_or_default(),
        stats.model.as_deref().unwrap_or("unknown")
    );
    if !session.config().notes.dir.is_dir() {
        println!(
            "Note: notes directory {} does not exist yet.",
            session.config().notes.dir.display()
        );
    }
    Ok(())
}

/// Probe the store, then run one index pass and print its summary.
///
/// Returns an error when the store is unreachable before the run starts or
/// when any note failed to index. A dry run opens the store read-only and
/// never creates it.
pub async fn run_index(
    config: Config,
    dry_run: bool,
    progress: Arc<dyn ProgressReporter>,
) -> Result<()> {
    let session = if dry_run {
        Session::open_read_only(config).await?
    } else {
        let probe = health::probe_store(&config).await;
        if !probe.healthy {
            return Err(NotesError::StoreUnreachable {
                url: config.store.url.clone(),
                reason: probe.notes.unwrap_or_default(),
            }
            .into());
        }
        Session::open(config).await?
    };
    let report = session.index(dry_run, progress.as_ref()).await?;
    print!("{}", render_index_report(&report));

    if !report.is_success() {
        bail!("{} note(s) failed to index", report.failed.len());
    }
    Ok(())
}

pub fn render_index_report(report: &IndexReport) -> String {
    let mut out = String::new();
    let verb = if report.dry_run { "would be" } else { "were" };

    out.push_str(&format!(
        "Scanned {} note(s) ({}).\n",
        report.scanned,
        if report.recursive {
            "recursive"
        } else {
            "top level only"
        }
    ));
    out.push_str(&format!(
        "  new: {}  modified: {}  unchanged: {}  deleted: {}\n",
        report.new.len(),
        report.modified.len(),
        report.unchanged,
        report.deleted.len()
    ));

    if report.dry_run {
        for (label, paths) in [
            ("new", &report.new),
            ("modified", &report.modified),
            ("deleted", &report.deleted),
        ] {
            for path in paths.iter() {
                out.push_str(&format!("  {:<9} {}\n", label, path));
            }
        }
        if !report.has_changes() {
            out.push_str("Nothing would change.\n");
        } else {
            out.push_str(&format!(
                "Dry run: {} note(s) {} written.\n",
                report.new.len() + report.modified.len() + report.deleted.len(),
                verb
            ));
        }
    } else {
        out.push_str(&format!(
            "Embedded {} chunk(s) in {} call(s); {} note(s) {} written.\n",
            report.chunks_embedded, report.embedding_calls, report.notes_written, verb
        ));
    }

    if !report.unreadable.is_empty() {
        out.push_str(&format!(
            "Unreadable (kept in index): {}\n",
            report.unreadable.join(", ")
        ));
    }
    if !report.warnings.is_empty() {
        out.push_str(&format!("Warnings: {}\n", report.warnings.len()));
        for w in &report.warnings {
            out.push_str(&format!("  {}: {}\n", w.path, w.reason));
        }
    }
    if !report.failed.is_empty() {
        out.push_str(&format!("Failed: {}\n", report.failed.len()));
        for f in &report.failed {
            out.push_str(&format!("  {} [{}] {}\n", f.path, f.kind, f.error));
        }
    }
    out
}

pub async fn run_search(
    config: Config,
    query: &str,
    limit: Option<usize>,
    filter: SearchFilter,
) -> Result<()> {
    let k = limit.unwrap_or(config.retrieval.k);
    let session = Session::open(config).await?;
    let hits = session.search(query, k, &filter).await?;
    print!("{}", render_hits(&hits));
    Ok(())
}

pub fn render_hits(hits: &[ScoredChunk]) -> String {
    if hits.is_empty() {
        return "No results.\n".to_string();
    }
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{:.2}] {} ({})\n",
            i + 1,
            hit.score,
            hit.title,
            format_date(hit.date)
        ));
        out.push_str(&format!("    note: {} #{}\n", hit.note_path, hit.ordinal));
        if !hit.attendees.is_empty() {
            out.push_str(&format!("    attendees: {}\n", hit.attendees.join(", ")));
        }
        out.push_str(&format!("    > {}\n\n", snippet(&hit.text, 200)));
    }
    out
}

pub async fn run_ask(config: Config, question: &str, filter: SearchFilter) -> Result<()> {
    let session = Session::open(config).await?;
    let result = session.spawn_ask(question.to_string(), filter).await??;
    print!("{}", render_answer(&result));
    Ok(())
}

pub fn render_answer(result: &QueryResult) -> String {
    let mut out = format!("{}\n", result.answer);
    if !result.attributions.is_empty() {
        out.push_str("\nSources:\n");
        for (i, a) in result.attributions.iter().enumerate() {
            out.push_str(&format!(
                "  [{}] {} ({}) {}\n",
                i + 1,
                a.title,
                format_date(a.date),
                a.note_path
            ));
        }
    }
    out
}

/// Print every probe. Fails when any of them is unhealthy.
pub async fn run_health(config: &Config) -> Result<()> {
    let probes = health::probe_all(config).await;
    println!("{:<8} {:<8} NOTES", "PROBE", "HEALTHY");
    for p in &probes {
        println!(
            "{:<8} {:<8} {}",
            p.name,
            p.healthy,
            p.notes.as_deref().unwrap_or("")
        );
    }
    let unhealthy: Vec<&str> = probes
        .iter()
        .filter(|p| !p.healthy)
        .map(|p| p.name.as_str())
        .collect();
    if !unhealthy.is_empty() {
        bail!("unhealthy: {}", unhealthy.join(", "));
    }
    Ok(())
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "undated".to_string())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
