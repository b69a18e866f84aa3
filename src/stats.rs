//! Collection statistics.
//!
//! Gives a quick summary of what is indexed: note and chunk counts, the
//! embedding model the collection was built with, and when it was last
//! written. Used by `notes stats` to confirm that an index run landed.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db;
use crate::session::Session;
use crate::store::StoreStats;

/// Run the stats command: read the collection summary and print it.
pub async fn run_stats(session: &Session) -> Result<()> {
    let stats = session.stats().await?;
    print!("{}", render_stats(session.config(), &stats, Utc::now()));
    Ok(())
}

pub fn render_stats(config: &Config, stats: &StoreStats, now: DateTime<Utc>) -> String {
    let db_size = db::database_path(&config.store.url)
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    let mut out = String::new();
    out.push_str("Meeting Notes Index Stats\n");
    out.push_str("=========================\n\n");
    out.push_str(&format!("  Store:       {}\n", config.store.url));
    out.push_str(&format!("  Size:        {}\n", format_bytes(db_size)));
    out.push_str(&format!("  Collection:  {}\n", stats.collection));
    out.push_str(&format!(
        "  Model:       {}\n",
        match (&stats.model, stats.dims) {
            (Some(model), Some(dims)) => format!("{} ({} dims)", model, dims),
            _ => "not created".to_string(),
        }
    ));
    out.push('\n');
    out.push_str(&format!("  Notes:       {}\n", stats.notes));
    out.push_str(&format!("  Chunks:      {}\n", stats.chunks));
    out.push_str(&format!(
        "  Last index:  {}\n",
        stats
            .last_indexed
            .as_deref()
            .map(|ts| format_ts_relative(ts, now))
            .unwrap_or_else(|| "never".to_string())
    ));
    out.push('\n');
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an RFC 3339 timestamp relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(ts: &str, now: DateTime<Utc>) -> String {
    let Ok(then) = DateTime::parse_from_rfc3339(ts) else {
        return ts.to_string();
    };
    let then = then.with_timezone(&Utc);
    let delta = (now - then).num_seconds();

    if delta < 0 {
        then.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        then.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = Utc.with_ymd_and_hms(2025, 9, 17, 12, 0, 0).unwrap();
        assert_eq!(format_ts_relative("2025-09-17T11:59:30+00:00", now), "just now");
        assert_eq!(format_ts_relative("2025-09-17T09:00:00+00:00", now), "3 hours ago");
        assert_eq!(format_ts_relative("2025-09-16T12:00:00+00:00", now), "1 day ago");
        assert_eq!(format_ts_relative("2025-01-01T08:30:00+00:00", now), "2025-01-01 08:30");
        assert_eq!(format_ts_relative("garbage", now), "garbage");
    }

    #[test]
    fn test_render_empty_collection() {
        let config = Config::with_notes_dir("/tmp/notes");
        let stats = StoreStats {
            collection: "meeting_notes".to_string(),
            ..Default::default()
        };
        let out = render_stats(&config, &stats, Utc::now());
        assert!(out.contains("Collection:  meeting_notes"));
        assert!(out.contains("Model:       not created"));
        assert!(out.contains("Last index:  never"));
    }
}
