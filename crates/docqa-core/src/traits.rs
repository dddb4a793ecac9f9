use crate::error::Result;
use crate::types::Metric;

/// Maps text to a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `hashing:d384`), recorded in snapshots.
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_one(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch form. Overrides must return exactly what `embed_one` returns per item.
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}

/// Turns a prompt into generated text.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Nearest-neighbor structure over slot-addressed vectors.
///
/// Slots are assigned densely in insertion order, starting at 0. Payloads live in the
/// owning index; a backend only knows vectors.
pub trait SearchBackend: Send + Sync {
    fn metric(&self) -> Metric;
    /// `None` until the first insert.
    fn dimension(&self) -> Option<usize>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Appends a vector and returns its slot.
    fn insert(&mut self, vector: &[f32]) -> Result<usize>;
    /// Candidates as `(slot, score)`, best first. Must include every candidate whose
    /// score ties the k-th best so the caller can break ties deterministically.
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)>;
    /// A fresh, empty backend of the same kind and metric.
    fn empty(&self) -> Box<dyn SearchBackend>;
}
