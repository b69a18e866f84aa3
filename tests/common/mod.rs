//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use notes_rag::config::Config;
use notes_rag::embedding::Embedder;
use notes_rag::error::{NotesError, Result};
use notes_rag::llm::LlmClient;

pub const DIMS: usize = 32;

/// Deterministic bag-of-words embedder: each lowercase word is hashed into
/// one of `DIMS` buckets, and the vector is L2-normalised.
pub struct KeywordEmbedder {
    calls: AtomicUsize,
    texts: AtomicUsize,
    down: AtomicBool,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let word = word.to_lowercase();
            let mut h: u32 = 2166136261;
            for b in word.bytes() {
                h ^= b as u32;
                h = h.wrapping_mul(16777619);
            }
            v[(h as usize) % DIMS] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-bag"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(NotesError::EmbeddingUnavailable {
                backend: "keyword-bag".to_string(),
                reason: "backend offline".to_string(),
            });
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// LLM that records every prompt and answers with a fixed string.
pub struct RecordingLlm {
    pub answer: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingLlm {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for RecordingLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }

    fn model_name(&self) -> &str {
        "recording"
    }
}

/// LLM that never answers in time.
pub struct StalledLlm;

#[async_trait]
impl LlmClient for StalledLlm {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(String::new())
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

pub fn write_note(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn test_config(notes_dir: &Path) -> Config {
    let mut config = Config::with_notes_dir(notes_dir);
    config.embedding.dims = Some(DIMS);
    config.llm.timeout_secs = 1;
    config
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

pub const SPRINT_PLANNING: &str = "# Sprint Planning
**Date:** 2025-09-17
**Attendees:** Alice, Bob

## Decisions
We will ship the search feature on Friday after QA signs off on the release.

## Action Items
- [ ] Alice: update the changelog | 2025-09-19
";

pub const RETRO: &str = "# Retrospective
Date: 2025-09-10
Attendees: Carol, Dave

The deploy pipeline was flaky all week. Carol will pin the runner image.
";

/// Two meetings logged in one file.
pub const DIARY: &str = "# Team diary

## Standup
Date: 2025-09-01
Attendees: Alice, Bob

Payments are blocked on the security review.

## Meeting Title: Design review
**Date:** 2025-09-03
**Attendees:** Carol, Åsa Berg

We agreed on the new invoice schema.

## Action Items
- [ ] Carol: write the migration
";
