//! Shared wiring for the `docqa` and `docqa-indexer` binaries.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use docqa_core::config::{resolve_with_base, Config, Settings};
use docqa_core::loader::DocumentLoader;
use docqa_core::{Answer, Chunk, Chunker, Embedder};
use docqa_embed::get_default_embedder;
use docqa_llm::{AzureOpenAiConfig, AzureOpenAiGenerator};
use docqa_rag::{QueryOrchestrator, RetrievalEngine};
use docqa_vector::VectorIndex;
use indicatif::{ProgressBar, ProgressStyle};

/// Logs go to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Settings plus the resolved data and index locations.
pub struct App {
    pub settings: Settings,
    pub data_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl App {
    pub fn load() -> Result<Self> {
        let config = Config::load().context("loading configuration")?;
        Self::from_settings(config.settings()?)
    }

    pub fn from_settings(settings: Settings) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let data_dir = resolve_with_base(&cwd, &settings.data.dir);
        let index_dir = resolve_with_base(&cwd, &settings.data.index_dir);
        Ok(Self { settings, data_dir, index_dir })
    }

    pub fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        Ok(get_default_embedder()?)
    }

    pub fn load_chunks(&self, data_dir: &Path) -> Result<Vec<Chunk>> {
        let chunker = Chunker::from_settings(&self.settings.chunking)?;
        let loader = DocumentLoader::new(data_dir).with_limit(self.settings.data.file_limit);
        let chunks = loader
            .load_and_split(&chunker)
            .with_context(|| format!("loading documents from {}", data_dir.display()))?;
        Ok(chunks)
    }

    /// Embeds `chunks` into `index` with a progress bar and returns how many were
    /// embedded. With `fresh` the index is rebuilt; otherwise only sources it does not
    /// hold yet are added. A source whose stored chunks differ from `chunks` forces a
    /// full rebuild, since entries cannot be replaced in place.
    pub fn ingest(&self, index: &VectorIndex, chunks: &[Chunk], embedder: &dyn Embedder, fresh: bool) -> Result<usize> {
        let changed = if fresh { Vec::new() } else { changed_sources(index, chunks) };
        let fresh = fresh || !changed.is_empty();
        if !changed.is_empty() {
            tracing::warn!(sources = ?changed, "documents changed since they were indexed");
            println!("{} changed since indexing, rebuilding the index", changed.join(", "));
        }
        let pending: Vec<Chunk> = if fresh {
            chunks.to_vec()
        } else {
            let mut seen = HashSet::new();
            chunks
                .iter()
                .filter(|c| index.get(&c.id).is_none() && seen.insert(c.id.as_str()))
                .cloned()
                .collect()
        };
        let pb = ProgressBar::new(pending.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%)")?
                .progress_chars("#>-"),
        );
        let progress = |done: usize| pb.set_position(done as u64);
        if fresh {
            index.build_with_progress(&pending, embedder, &progress)?;
        } else if !pending.is_empty() {
            index.add(&pending, embedder)?;
            pb.set_position(pending.len() as u64);
        }
        pb.finish_and_clear();
        Ok(pending.len())
    }

    /// Opens the saved index, or builds and saves one from the data directory.
    pub fn open_or_build(&self, embedder: &dyn Embedder) -> Result<Arc<VectorIndex>> {
        match VectorIndex::open(&self.index_dir) {
            Ok(index) => {
                tracing::info!(dir = %self.index_dir.display(), chunks = index.len(), "loaded index");
                Ok(Arc::new(index.with_batch_size(self.settings.index.batch_size)))
            }
            Err(docqa_core::Error::IndexNotFound(_)) => {
                println!("No index at {}, building from {}", self.index_dir.display(), self.data_dir.display());
                let index = VectorIndex::new(self.settings.index.metric).with_batch_size(self.settings.index.batch_size);
                let chunks = self.load_chunks(&self.data_dir)?;
                let added = self.ingest(&index, &chunks, embedder, true)?;
                index.save(&self.index_dir)?;
                println!("Indexed {added} chunks into {}", self.index_dir.display());
                Ok(Arc::new(index))
            }
            Err(e) => Err(e).with_context(|| format!("opening index at {}", self.index_dir.display())),
        }
    }

    /// Must be called outside the async runtime: the HTTP client is blocking.
    pub fn orchestrator(&self, index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Result<QueryOrchestrator> {
        let generation = &self.settings.generation;
        let azure = AzureOpenAiConfig::from_env()
            .context("Azure OpenAI is not configured")?
            .with_temperature(generation.temperature)
            .with_timeout(Duration::from_secs(generation.timeout_secs));
        let generator = Arc::new(AzureOpenAiGenerator::new(azure)?);
        let retrieval = RetrievalEngine::from_settings(index, embedder, &self.settings.retrieval)?;
        Ok(QueryOrchestrator::from_settings(retrieval, generator, &self.settings))
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.generation.timeout_secs)
    }
}

/// Sources that `index` already holds with a different set of chunk ids or texts.
fn changed_sources(index: &VectorIndex, chunks: &[Chunk]) -> Vec<String> {
    let mut by_source: BTreeMap<&str, HashMap<&str, &str>> = BTreeMap::new();
    for c in chunks {
        by_source.entry(c.source.as_str()).or_default().insert(c.id.as_str(), c.text.as_str());
    }
    by_source
        .into_iter()
        .filter(|(source, incoming)| {
            let stored = index.chunks_from(source);
            !stored.is_empty()
                && (stored.len() != incoming.len()
                    || stored.iter().any(|c| incoming.get(c.id.as_str()) != Some(&c.text.as_str())))
        })
        .map(|(source, _)| source.to_string())
        .collect()
}

/// Human-readable answer followed by the cited chunks.
pub fn format_answer(answer: &Answer) -> String {
    let mut out = answer.text.trim().to_string();
    if !answer.supporting_chunks.is_empty() {
        out.push_str("\n\nSources:");
        for c in &answer.supporting_chunks {
            match c.page() {
                Some(page) => out.push_str(&format!("\n  - {} (page {page})", c.source)),
                None => out.push_str(&format!("\n  - {} (chunk {})", c.source, c.position)),
            }
        }
    }
    out
}
