//! Embedder implementations.
//!
//! [`HashingEmbedder`] is deterministic and dependency-free; it backs tests and is
//! selected by `APP_USE_FAKE_EMBEDDINGS=1`. With the `local-model` feature,
//! [`MiniLmEmbedder`] runs sentence-transformers/all-MiniLM-L6-v2 through candle.
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use docqa_core::{Embedder, Error, Result};
use twox_hash::XxHash64;

#[cfg(feature = "local-model")]
mod model;
#[cfg(feature = "local-model")]
mod pool;
#[cfg(feature = "local-model")]
mod tokenize;

#[cfg(feature = "local-model")]
pub use model::MiniLmEmbedder;

/// Output size of all-MiniLM-L6-v2; the hashing embedder uses the same width.
pub const DEFAULT_DIM: usize = 384;

/// Bag-of-words feature hashing, L2-normalized.
///
/// Tokens are lowercase alphanumeric runs, so texts sharing words land close
/// together under cosine similarity. Text without tokens maps to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
    id: String,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidArgument("embedding dimension must be positive".into()));
        }
        Ok(Self { dim, id: format!("hashing:d{dim}") })
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dim: DEFAULT_DIM, id: format!("hashing:d{DEFAULT_DIM}") }
    }
}

impl Embedder for HashingEmbedder {
    fn id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0f32; self.dim];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let idx = usize::try_from(hasher.finish() % self.dim as u64).unwrap_or(0);
            v[idx] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v { *x /= norm; }
        }
        Ok(v)
    }
}

pub fn use_fake_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// The hashing embedder when `APP_USE_FAKE_EMBEDDINGS` is set, otherwise the local model.
pub fn get_default_embedder() -> Result<Arc<dyn Embedder>> {
    if use_fake_embeddings() {
        tracing::info!("using HashingEmbedder");
        return Ok(Arc::new(HashingEmbedder::default()));
    }
    local_embedder()
}

#[cfg(feature = "local-model")]
fn local_embedder() -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(MiniLmEmbedder::new()?))
}

#[cfg(not(feature = "local-model"))]
fn local_embedder() -> Result<Arc<dyn Embedder>> {
    Err(Error::EmbeddingFailure(
        "no local model compiled in; build with `--features local-model` or set APP_USE_FAKE_EMBEDDINGS=1".into(),
    ))
}
