//! TOML configuration parsing and validation.
//!
//! The configuration file is the single source for the notes directory,
//! store connection, chunking budget, embedding backend, LLM host, retrieval
//! depth, and the note-structure recognizer. A handful of environment
//! variables override file values (see [`Config::apply_env_overrides`]).
//!
//! ```toml
//! [notes]
//! dir = "~/Obsidian/Work/Diary"
//!
//! [store]
//! url = "sqlite://data/notes.sqlite"
//! collection = "meeting_notes"
//!
//! [embedding]
//! provider = "ollama"
//! model = "all-minilm"
//! dims = 384
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub notes: NotesConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub parser: ParserConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotesConfig {
    pub dir: PathBuf,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl NotesConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            recursive: true,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.markdown".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            collection: default_collection(),
        }
    }
}

fn default_store_url() -> String {
    "sqlite://data/notes.sqlite".to_string()
}
fn default_collection() -> String {
    "meeting_notes".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    750
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            model_dir: None,
            url: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Model identifier, falling back to the provider's default model.
    pub fn model_name(&self) -> String {
        if let Some(model) = &self.model {
            return model.clone();
        }
        match self.provider.as_str() {
            "local" => "all-minilm-l6-v2".to_string(),
            "openai" => "text-embedding-3-small".to_string(),
            _ => "all-minilm".to_string(),
        }
    }

    /// Vector dimensionality: explicit `dims`, else the known size of the model.
    pub fn resolved_dims(&self) -> Option<usize> {
        self.dims.or_else(|| known_model_dims(&self.model_name()))
    }

    pub fn endpoint(&self) -> String {
        let default = match self.provider.as_str() {
            "openai" => "https://api.openai.com",
            _ => "http://localhost:11434",
        };
        self.url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}

/// Output sizes of common sentence-embedding models.
pub fn known_model_dims(model: &str) -> Option<usize> {
    match model {
        "all-minilm" | "all-minilm-l6-v2" | "all-MiniLM-L6-v2" => Some(384),
        "bge-small-en-v1.5" | "multilingual-e5-small" => Some(384),
        "bge-base-en-v1.5" | "multilingual-e5-base" => Some(768),
        "nomic-embed-text" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => Some(768),
        "bge-large-en-v1.5" | "multilingual-e5-large" | "mxbai-embed-large" => Some(1024),
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_host")]
    pub host: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            host: default_llm_host(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_host() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "gemma3".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default)]
    pub min_score: Option<f32>,
    /// When an answer cites no context label, attribute the chunks scoring
    /// at least this fraction of the best score.
    #[serde(default = "default_attribution_ratio")]
    pub attribution_ratio: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            max_context_chars: default_max_context_chars(),
            min_score: None,
            attribution_ratio: default_attribution_ratio(),
        }
    }
}

fn default_k() -> usize {
    6
}
fn default_max_context_chars() -> usize {
    6000
}
fn default_attribution_ratio() -> f32 {
    0.85
}

/// Markers recognized when extracting structure from a note.
///
/// Meeting-note conventions differ between people, so none of these are
/// hard-coded in the parser. Labels are matched case-insensitively.
#[derive(Debug, Deserialize, Clone)]
pub struct ParserConfig {
    #[serde(default = "default_title_labels")]
    pub title_labels: Vec<String>,
    #[serde(default = "default_date_labels")]
    pub date_labels: Vec<String>,
    #[serde(default = "default_attendee_labels")]
    pub attendee_labels: Vec<String>,
    #[serde(default = "default_action_labels")]
    pub action_labels: Vec<String>,
    #[serde(default = "default_action_tags")]
    pub action_tags: Vec<String>,
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            title_labels: default_title_labels(),
            date_labels: default_date_labels(),
            attendee_labels: default_attendee_labels(),
            action_labels: default_action_labels(),
            action_tags: default_action_tags(),
            date_formats: default_date_formats(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_title_labels() -> Vec<String> {
    strings(&["Meeting Title", "Title"])
}
fn default_date_labels() -> Vec<String> {
    strings(&["Date"])
}
fn default_attendee_labels() -> Vec<String> {
    strings(&["Attendees", "Participants"])
}
fn default_action_labels() -> Vec<String> {
    strings(&["Action Items", "Actions", "Action"])
}
fn default_action_tags() -> Vec<String> {
    strings(&["TODO:", "ACTION:"])
}
fn default_date_formats() -> Vec<String> {
    strings(&[
        "%Y-%m-%d", "%Y/%m/%d", "%d %B %Y", "%B %d, %Y", "%b %d, %Y", "%d.%m.%Y",
    ])
}

impl Config {
    /// Build a configuration with defaults for everything but the notes dir.
    pub fn with_notes_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            notes: NotesConfig::new(dir),
            store: StoreConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            parser: ParserConfig::default(),
        }
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    ///
    /// | Variable | Key |
    /// |----------|-----|
    /// | `NOTES_DIR` | `notes.dir` |
    /// | `NOTES_STORE_URL` | `store.url` |
    /// | `NOTES_COLLECTION` | `store.collection` |
    /// | `OLLAMA_HOST` | `llm.host` |
    /// | `OLLAMA_MODEL` | `llm.model` |
    /// | `EMBEDDING_MODEL` | `embedding.model` |
    /// | `EMBEDDING_MODEL_DIR` | `embedding.model_dir` |
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NOTES_DIR") {
            self.notes.dir = PathBuf::from(v);
        }
        if let Some(v) = get("NOTES_STORE_URL") {
            self.store.url = v;
        }
        if let Some(v) = get("NOTES_COLLECTION") {
            self.store.collection = v;
        }
        if let Some(v) = get("OLLAMA_HOST") {
            self.llm.host = v;
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Some(v) = get("EMBEDDING_MODEL_DIR") {
            self.embedding.model_dir = Some(PathBuf::from(v));
        }
    }

    /// Check every invariant the pipelines rely on.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if 2 * self.chunking.chunk_overlap + 2 >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) is too large for chunking.chunk_size ({}); \
                 need 2 * overlap + 2 < chunk_size",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.retrieval.k < 1 {
            bail!("retrieval.k must be >= 1");
        }
        if self.retrieval.max_context_chars == 0 {
            bail!("retrieval.max_context_chars must be > 0");
        }
        if !(self.retrieval.attribution_ratio > 0.0 && self.retrieval.attribution_ratio <= 1.0) {
            bail!(
                "retrieval.attribution_ratio ({}) must be in (0, 1]",
                self.retrieval.attribution_ratio
            );
        }

        if !is_sql_identifier(&self.store.collection) {
            bail!(
                "store.collection '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                self.store.collection
            );
        }
        if !is_collection_name(&self.store.collection) {
            bail!(
                "store.collection '{}' is reserved by the store",
                self.store.collection
            );
        }

        match self.embedding.provider.as_str() {
            "local" | "ollama" | "openai" => {}
            other => bail!(
                "embedding.provider: unknown provider '{}'. Must be local, ollama, or openai.",
                other
            ),
        }
        match self.embedding.resolved_dims() {
            Some(0) => bail!("embedding.dims must be > 0"),
            Some(_) => {}
            None => bail!(
                "embedding.dims must be set for model '{}'",
                self.embedding.model_name()
            ),
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        if self.parser.date_formats.is_empty() {
            bail!("parser.date_formats must not be empty");
        }

        Ok(())
    }
}

pub(crate) fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A plain identifier that names neither the collection registry nor an
/// SQLite internal table.
pub(crate) fn is_collection_name(name: &str) -> bool {
    is_sql_identifier(name)
        && !name.eq_ignore_ascii_case("collections")
        && !name.to_ascii_lowercase().starts_with("sqlite_")
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.notes.dir = expand_home(&config.notes.dir);
    if let Some(dir) = &config.embedding.model_dir {
        config.embedding.model_dir = Some(expand_home(dir));
    }

    config.validate()?;
    Ok(config)
}
