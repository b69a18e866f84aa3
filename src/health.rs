//! Reachability probes for the store, the LLM host and the notes directory.
//!
//! Used by `notes health`, and by `notes index` to fail fast before a run
//! starts instead of midway through it.
//!
//! | Probe | Healthy When |
//! |-------|-------------|
//! | `notes` | `notes.dir` exists and is a directory |
//! | `store` | a connection opens and `SELECT 1` succeeds |
//! | `llm` | `GET {host}/api/tags` answers with a success status within 5s |

use std::time::Duration;

use serde::Serialize;

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeStatus {
    pub name: String,
    pub healthy: bool,
    pub notes: Option<String>,
}

impl ProbeStatus {
    fn ok(name: &str, notes: String) -> Self {
        Self {
            name: name.to_string(),
            healthy: true,
            notes: Some(notes),
        }
    }

    fn failed(name: &str, notes: String) -> Self {
        Self {
            name: name.to_string(),
            healthy: false,
            notes: Some(notes),
        }
    }
}

pub fn probe_notes_dir(config: &Config) -> ProbeStatus {
    let dir = &config.notes.dir;
    if dir.is_dir() {
        ProbeStatus::ok("notes", format!("dir: {}", dir.display()))
    } else {
        ProbeStatus::failed("notes", format!("{} is not a directory", dir.display()))
    }
}

pub async fn probe_store(config: &Config) -> ProbeStatus {
    let pool = match db::connect(&config.store).await {
        Ok(pool) => pool,
        Err(e) => return ProbeStatus::failed("store", e.to_string()),
    };
    let result = sqlx::query("SELECT 1").execute(&pool).await;
    pool.close().await;
    match result {
        Ok(_) => ProbeStatus::ok("store", format!("url: {}", config.store.url)),
        Err(e) => ProbeStatus::failed("store", format!("{}: {}", config.store.url, e)),
    }
}

pub async fn probe_llm(config: &Config) -> ProbeStatus {
    let host = config.llm.host.trim_end_matches('/');
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => return ProbeStatus::failed("llm", e.to_string()),
    };
    match client.get(format!("{}/api/tags", host)).send().await {
        Ok(resp) if resp.status().is_success() => {
            ProbeStatus::ok("llm", format!("host: {} (model {})", host, config.llm.model))
        }
        Ok(resp) => ProbeStatus::failed("llm", format!("{} answered {}", host, resp.status())),
        Err(e) => ProbeStatus::failed("llm", format!("{}: {}", host, e)),
    }
}

/// All probes, in a fixed order.
pub async fn probe_all(config: &Config) -> Vec<ProbeStatus> {
    vec![
        probe_notes_dir(config),
        probe_store(config).await,
        probe_llm(config).await,
    ]
}
