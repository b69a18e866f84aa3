//! # Notes CLI (`notes`)
//!
//! Index a folder of Markdown meeting notes and ask questions about it.
//!
//! ## Usage
//!
//! ```bash
//! notes --config ./config/notes.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `notes init` | Create the store and the vector collection |
//! | `notes index` | Embed new and modified notes, drop deleted ones |
//! | `notes search "<query>"` | Show the closest chunks without generating |
//! | `notes ask "<question>"` | Answer a question from the notes |
//! | `notes health` | Probe the notes dir, the store and the LLM host |
//! | `notes stats` | Summarise the collection |

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use notes_rag::cli;
use notes_rag::config;
use notes_rag::error::NotesError;
use notes_rag::progress::ProgressMode;
use notes_rag::session::Session;
use notes_rag::stats;

/// Retrieval-augmented question answering over Markdown meeting notes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/notes.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "notes", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/notes.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and the collection for the configured model.
    ///
    /// Idempotent. Fails if the collection already holds vectors of a
    /// different dimensionality.
    Init,

    /// Bring the index in line with the notes directory.
    ///
    /// Only new and modified notes are parsed and embedded; deleted notes
    /// are removed from the store.
    Index {
        /// Classify notes and report what would change, without writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr: `off`, `human` or `json`.
        /// Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long, value_parser = ["off", "human", "json"])]
        progress: Option<String>,
    },

    /// Show the chunks closest to a query.
    Search {
        query: String,

        /// Maximum number of chunks (defaults to `retrieval.k`).
        #[arg(long)]
        limit: Option<usize>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Answer a question from the indexed notes.
    Ask {
        question: String,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Probe the notes directory, the store and the LLM host.
    Health,

    /// Summarise the collection.
    Stats,
}

#[derive(clap::Args)]
struct FilterArgs {
    /// Only notes with a matching attendee (case-insensitive substring).
    #[arg(long)]
    attendee: Option<String>,

    /// Only notes dated on this day (YYYY-MM-DD).
    #[arg(long)]
    date: Option<String>,

    /// Only notes whose title contains this text (case-insensitive).
    #[arg(long)]
    title: Option<String>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,notes_rag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Kind of the first [`NotesError`] in the chain, if any.
fn error_kind(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|e| e.downcast_ref::<NotesError>())
        .map(NotesError::kind)
        .unwrap_or("Error")
}

async fn run(command: Commands, cfg: config::Config) -> anyhow::Result<()> {
    match command {
        Commands::Init => cli::run_init(cfg).await?,
        Commands::Index { dry_run, progress } => {
            let mode = match progress.as_deref() {
                Some("off") => ProgressMode::Off,
                Some("json") => ProgressMode::Json,
                Some(_) => ProgressMode::Human,
                None => ProgressMode::default_for_tty(),
            };
            cli::run_index(cfg, dry_run, Arc::from(mode.reporter())).await?;
        }
        Commands::Search {
            query,
            limit,
            filter,
        } => {
            let filter = cli::build_filter(filter.attendee, filter.date, filter.title)?;
            cli::run_search(cfg, &query, limit, filter).await?;
        }
        Commands::Ask { question, filter } => {
            let filter = cli::build_filter(filter.attendee, filter.date, filter.title)?;
            cli::run_ask(cfg, &question, filter).await?;
        }
        Commands::Health => cli::run_health(&cfg).await?,
        Commands::Stats => {
            let session = Session::open(cfg).await?;
            stats::run_stats(&session).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error [InvalidConfig]: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error [{}]: {:#}", error_kind(&err), err);
            ExitCode::FAILURE
        }
    }
}
