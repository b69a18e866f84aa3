//! Retrieval-augmented question answering.
//!
//! `answer` embeds the question with the same embedder used for indexing,
//! retrieves the top-k chunks, packs them into a bounded context where
//! every block is labelled with its note, title and date, and asks the LLM.
//! Attributions name the notes the answer relies on: the context blocks it
//! cites by `[n]` label, or, for an answer that cites nothing, the blocks
//! scoring close to the best hit.
//!
//! Retrieval finishes, and its results are owned by the pipeline, before the
//! LLM is called. The LLM call runs in its own task under a timeout, so a
//! slow or dead LLM host fails the query without touching index state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{embed_query, Embedder};
use crate::error::{NotesError, Result};
use crate::llm::LlmClient;
use crate::models::{Attribution, QueryResult, ScoredChunk};
use crate::store::{SearchFilter, VectorStore};

pub const NO_CONTEXT_ANSWER: &str = "No relevant meeting notes were found for this question.";

pub struct QueryPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
    retrieval: RetrievalConfig,
    llm_host: String,
    llm_timeout: Duration,
}

impl QueryPipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            retrieval: config.retrieval.clone(),
            llm_host: config.llm.host.clone(),
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }

    /// Top `k` chunks for `query`, without generation.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(NotesError::EmptyQuestion);
        }
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        let mut hits = self.store.search(&vector, k.max(1), filter).await?;
        if let Some(min) = self.retrieval.min_score {
            hits.retain(|h| h.score >= min);
        }
        Ok(hits)
    }

    pub async fn answer(&self, question: &str, filter: &SearchFilter) -> Result<QueryResult> {
        let question = question.trim();
        let hits = self.search(question, self.retrieval.k, filter).await?;

        let (context, used) = build_context(hits, self.retrieval.max_context_chars);
        if used.is_empty() {
            info!("No chunks retrieved; skipping generation");
            return Ok(QueryResult {
                question: question.to_string(),
                answer: NO_CONTEXT_ANSWER.to_string(),
                chunks: Vec::new(),
                attributions: Vec::new(),
            });
        }

        let prompt = build_prompt(&context, question);
        debug!(chunks = used.len(), context_chars = context.len(), "Prompt assembled");
        let answer = self.generate(prompt).await?;

        let attributions = attributions(&used, &answer, self.retrieval.attribution_ratio);
        debug!(
            cited = attributions.len(),
            context = used.len(),
            "Attributed answer"
        );
        Ok(QueryResult {
            question: question.to_string(),
            answer,
            attributions,
            chunks: used,
        })
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let llm = Arc::clone(&self.llm);
        let mut handle = tokio::spawn(async move { llm.generate(&prompt).await });

        match tokio::time::timeout(self.llm_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(NotesError::LlmUnreachable {
                host: self.llm_host.clone(),
                reason: format!("generation task failed: {}", join_err),
            }),
            Err(_) => {
                handle.abort();
                Err(NotesError::LlmUnreachable {
                    host: self.llm_host.clone(),
                    reason: format!("no answer within {}s", self.llm_timeout.as_secs()),
                })
            }
        }
    }
}

/// Pack ranked chunks into labelled context blocks within `max_chars`.
///
/// Blocks are added in rank order until the next one does not fit. The
/// first block is truncated rather than dropped, so a non-empty hit list
/// always yields some context. Returns the context and the chunks used.
pub fn build_context(hits: Vec<ScoredChunk>, max_chars: usize) -> (String, Vec<ScoredChunk>) {
    let mut context = String::new();
    let mut used = Vec::new();

    for hit in hits {
        let label = format!(
            "[{}] {} ({}) {}",
            used.len() + 1,
            hit.title,
            hit.date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "undated".to_string()),
            hit.note_path
        );
        let separator = if context.is_empty() { "" } else { "\n\n" };
        let block = format!("{}{}\n{}", separator, label, hit.text);

        if context.len() + block.len() > max_chars {
            if used.is_empty() {
                let cut = floor_char_boundary(&block, max_chars);
                context.push_str(&block[..cut]);
                used.push(hit);
            }
            break;
        }
        context.push_str(&block);
        used.push(hit);
    }

    (context, used)
}

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a helpful assistant answering questions about the user's meeting notes. \
         Answer using only the context below. Cite the notes you rely on by their [n] label. \
         If the context does not contain the answer, say so.\n\n\
         Context:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, question
    )
}

/// Notes the answer relies on, distinct and in rank order.
///
/// Blocks cited by a valid `[n]` label win. An answer without citations
/// falls back to the blocks scoring at least `ratio` of the top score, which
/// always includes the top block.
pub fn attributions(used: &[ScoredChunk], answer: &str, ratio: f32) -> Vec<Attribution> {
    let cited = cited_labels(answer, used.len());
    let relied_on: Vec<&ScoredChunk> = if cited.is_empty() {
        let top = used.first().map(|h| h.score).unwrap_or(0.0);
        used.iter()
            .enumerate()
            .filter(|(i, h)| *i == 0 || (top > 0.0 && h.score >= top * ratio))
            .map(|(_, h)| h)
            .collect()
    } else {
        used.iter()
            .enumerate()
            .filter(|(i, _)| cited.contains(&(i + 1)))
            .map(|(_, h)| h)
            .collect()
    };

    let mut out: Vec<Attribution> = Vec::new();
    for hit in relied_on {
        if !out.iter().any(|a| a.note_path == hit.note_path) {
            out.push(Attribution {
                note_path: hit.note_path.clone(),
                title: hit.title.clone(),
                date: hit.date,
            });
        }
    }
    out
}

/// Context labels cited in `answer` as `[2]` or `[1, 3]`, limited to `1..=max`.
pub fn cited_labels(answer: &str, max: usize) -> Vec<usize> {
    let mut labels = Vec::new();
    let mut rest = answer;
    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else { break };
        let inside = &rest[..close];
        let numbers: Option<Vec<usize>> = inside
            .split(',')
            .map(|part| part.trim().parse::<usize>().ok())
            .collect();
        if let Some(numbers) = numbers {
            for n in numbers {
                if (1..=max).contains(&n) && !labels.contains(&n) {
                    labels.push(n);
                }
            }
            rest = &rest[close + 1..];
        }
    }
    labels.sort_unstable();
    labels
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
