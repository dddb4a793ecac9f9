//! Context assembly, prompt construction and answer classification.
//!
//! Context entries carry provenance so the model (and the reader) can tell where
//! each passage came from:
//! - `(manual.pdf, page 3): text` when the chunk has page metadata
//! - `(notes.txt, chunk 4): text` otherwise
//!
//! Entries are joined by a blank line and admitted in rank order until the next
//! one would push the context past the character budget.
use docqa_core::config::GenerationSettings;
use docqa_core::{Answer, Chunk, Generator, Result, SearchResult};

pub const DEFAULT_SENTINEL: &str = "I don't know based on the provided document.";
pub const NO_CONTEXT: &str = "No context available.";
const SEPARATOR: &str = "\n\n";

/// Context text plus the chunks that made it in.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub text: String,
    pub chunks: Vec<Chunk>,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AnswerComposer {
    sentinel: String,
}

impl Default for AnswerComposer {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL)
    }
}

impl AnswerComposer {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self { sentinel: sentinel.into() }
    }

    pub fn from_settings(settings: &GenerationSettings) -> Self {
        Self::new(settings.sentinel.clone())
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    pub fn build_context(&self, results: &[SearchResult], budget: usize) -> Context {
        let mut text = String::new();
        let mut used = 0usize;
        let mut chunks = Vec::new();
        for r in results {
            let entry = provenance_entry(&r.chunk);
            let sep = if chunks.is_empty() { 0 } else { SEPARATOR.len() };
            let cost = sep + entry.chars().count();
            if used + cost > budget {
                tracing::debug!(admitted = chunks.len(), offered = results.len(), budget, "context budget reached");
                break;
            }
            if sep > 0 {
                text.push_str(SEPARATOR);
            }
            text.push_str(&entry);
            used += cost;
            chunks.push(r.chunk.clone());
        }
        Context { text, chunks }
    }

    pub fn build_prompt(&self, question: &str, context: &Context) -> String {
        let body = if context.is_empty() { NO_CONTEXT } else { context.text.as_str() };
        format!(
            "You are an assistant that answers questions strictly using the provided context.\n\
             If the answer is not present in the context, reply exactly: \"{sentinel}\"\n\n\
             Context:\n{body}\n\n\
             Question:\n{question}\n\n\
             Answer concisely and clearly.",
            sentinel = self.sentinel,
        )
    }

    /// Builds the prompt and calls `generator` exactly once.
    pub fn compose(&self, question: &str, results: &[SearchResult], budget: usize, generator: &dyn Generator) -> Result<Answer> {
        let context = self.build_context(results, budget);
        let prompt = self.build_prompt(question, &context);
        let text = generator.generate(&prompt)?;
        let unanswerable = self.is_sentinel(&text);
        tracing::debug!(supporting = context.chunks.len(), unanswerable, "answer composed");
        Ok(Answer { text, supporting_chunks: context.chunks, unanswerable })
    }

    /// Whether `output` is the sentinel phrase, ignoring case, quoting,
    /// surrounding whitespace and trailing punctuation.
    pub fn is_sentinel(&self, output: &str) -> bool {
        let expected = normalize(&self.sentinel);
        !expected.is_empty() && normalize(output) == expected
    }
}

fn provenance_entry(chunk: &Chunk) -> String {
    match chunk.page() {
        Some(page) => format!("({}, page {page}): {}", chunk.source, chunk.text),
        None => format!("({}, chunk {}): {}", chunk.source, chunk.position, chunk.text),
    }
}

fn normalize(s: &str) -> String {
    const QUOTES: &[char] = &['"', '\'', '`', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];
    const TRAILING: &[char] = &['.', '!', '?', ',', ';', ':', '\u{2026}'];
    let lowered = s.to_lowercase().replace(['\u{2018}', '\u{2019}'], "'");
    let mut t = lowered.as_str();
    loop {
        let next = t.trim().trim_matches(QUOTES).trim_end_matches(TRAILING);
        if next.len() == t.len() {
            break;
        }
        t = next;
    }
    t.split_whitespace().collect::<Vec<_>>().join(" ")
}
