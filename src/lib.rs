//! # Notes RAG
//!
//! Local retrieval-augmented question answering over a folder of Markdown
//! meeting notes.
//!
//! Notes are scanned, parsed into structured meetings (title, date,
//! attendees, action items), split into overlapping chunks, embedded and
//! stored in a vector collection. Re-indexing only touches notes whose
//! content fingerprint changed. Questions are answered by retrieving the
//! closest chunks and handing them to a local LLM together with the
//! question, and every answer carries the notes it drew from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────┐
//! │  Notes   │──▶│ Scan+Classify│──▶│Parse+Chunk│──▶│  Embed   │
//! │   dir    │   │ (fingerprint)│   │           │   │          │
//! └──────────┘   └──────────────┘   └───────────┘   └────┬─────┘
//!                                                        ▼
//!                ┌──────────┐   ┌──────────────┐   ┌──────────┐
//!                │   LLM    │◀──│ Query (top-k)│◀──│  Vector  │
//!                │ (Ollama) │   │  + context   │   │  store   │
//!                └──────────┘   └──────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! notes init                            # create store and collection
//! notes index                           # embed new and changed notes
//! notes search "release date" --attendee alice
//! notes ask "What did we decide about the launch?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`scan`] | Notes directory discovery |
//! | [`parser`] | Meeting note parsing |
//! | [`change`] | Fingerprints and change classification |
//! | [`chunk`] | Overlapping chunk windows |
//! | [`embedding`] | Embedding providers |
//! | [`store`] | Vector store backends |
//! | [`indexer`] | Incremental index runs |
//! | [`llm`] | LLM client |
//! | [`query`] | Retrieval and answer generation |
//! | [`session`] | Component wiring |
//! | [`health`] | Reachability probes |

pub mod change;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod health;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod parser;
pub mod progress;
pub mod query;
pub mod scan;
pub mod session;
pub mod stats;
pub mod store;
