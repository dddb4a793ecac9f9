use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use docqa_core::config::RetrievalSettings;
use docqa_core::{Embedder, Error, Query, Result, SearchResult};
use docqa_vector::VectorIndex;

/// Embeds a question and returns the nearest chunks from a shared index.
pub struct RetrievalEngine {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    min_score: Option<f32>,
    cache: Option<QueryCache>,
}

impl RetrievalEngine {
    /// Fails with `DimensionMismatch` when the index already holds vectors of
    /// another width than the embedder produces.
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if let Some(dim) = index.dimension() {
            if dim != embedder.dim() {
                return Err(Error::DimensionMismatch { expected: dim, actual: embedder.dim() });
            }
        }
        if let Some(stored) = index.embedder_id() {
            if stored != embedder.id() {
                tracing::warn!(index = %stored, query = embedder.id(), "index was built with a different embedder");
            }
        }
        Ok(Self { index, embedder, min_score: None, cache: None })
    }

    pub fn from_settings(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>, settings: &RetrievalSettings) -> Result<Self> {
        Ok(Self::new(index, embedder)?
            .with_min_score(settings.min_score)
            .with_query_cache(settings.query_cache_size))
    }

    /// Drops hits scoring below `min_score`.
    #[must_use]
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    /// Remembers the embeddings of the last `capacity` distinct questions; `0` disables it.
    #[must_use]
    pub fn with_query_cache(mut self, capacity: usize) -> Self {
        self.cache = (capacity > 0).then(|| QueryCache::new(capacity));
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn retrieve(&self, question: &str, k: usize) -> Result<Vec<SearchResult>> {
        let query = Query::new(question, k)?;
        let vector = self.embed_query(&query.text)?;
        let mut results = self.index.query(&vector, query.k)?;
        if let Some(min) = self.min_score {
            let before = results.len();
            results.retain(|r| r.score >= min);
            for (rank, r) in results.iter_mut().enumerate() {
                r.rank = rank;
            }
            if results.len() < before {
                tracing::debug!(dropped = before - results.len(), min_score = min, "filtered low-scoring hits");
            }
        }
        tracing::debug!(k, hits = results.len(), "retrieved");
        Ok(results)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(text)? {
                return Ok(hit);
            }
        }
        let vector = self.embedder.embed_one(text)?;
        if vector.len() != self.embedder.dim() {
            return Err(Error::DimensionMismatch { expected: self.embedder.dim(), actual: vector.len() });
        }
        if let Some(cache) = &self.cache {
            cache.put(text, vector.clone())?;
        }
        Ok(vector)
    }
}

/// Bounded FIFO memo of question embeddings.
struct QueryCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    map: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl QueryCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, inner: Mutex::new(CacheInner::default()) }
    }

    fn get(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(inner.map.get(text).cloned())
    }

    fn put(&self, text: &str, vector: Vec<f32>) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        if inner.map.contains_key(text) {
            return Ok(());
        }
        while inner.order.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.map.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(text.to_string());
        inner.map.insert(text.to_string(), vector);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use docqa_core::{Chunk, Meta, Metric};
    use docqa_embed::HashingEmbedder;

    struct Counting {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    impl Embedder for Counting {
        fn id(&self) -> &str { self.inner.id() }
        fn dim(&self) -> usize { self.inner.dim() }
        fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_one(text)
        }
    }

    fn index() -> Arc<VectorIndex> {
        let index = VectorIndex::new(Metric::Cosine);
        let chunks = vec![
            Chunk::new("a.txt", 0, "chickens need fresh water daily", Meta::new()),
            Chunk::new("a.txt", 1, "goats eat hay in winter", Meta::new()),
            Chunk::new("b.txt", 0, "bees make honey from nectar", Meta::new()),
        ];
        index.build(&chunks, &HashingEmbedder::default()).unwrap();
        Arc::new(index)
    }

    #[test]
    fn cache_avoids_re_embedding_and_evicts_oldest() {
        let embedder = Arc::new(Counting { inner: HashingEmbedder::default(), calls: AtomicUsize::new(0) });
        let engine = RetrievalEngine::new(index(), embedder.clone()).unwrap().with_query_cache(2);
        engine.retrieve("what do goats eat", 2).unwrap();
        engine.retrieve("what do goats eat", 2).unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        engine.retrieve("honey", 2).unwrap();
        engine.retrieve("water", 2).unwrap();
        engine.retrieve("what do goats eat", 2).unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn without_cache_every_call_embeds_once() {
        let embedder = Arc::new(Counting { inner: HashingEmbedder::default(), calls: AtomicUsize::new(0) });
        let engine = RetrievalEngine::new(index(), embedder.clone()).unwrap();
        engine.retrieve("honey", 1).unwrap();
        engine.retrieve("honey", 1).unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn min_score_filters_and_reranks() {
        let engine = RetrievalEngine::new(index(), Arc::new(HashingEmbedder::default())).unwrap().with_min_score(Some(0.3));
        let results = engine.retrieve("bees make honey", 3).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.score >= 0.3));
        assert_eq!(results[0].chunk.id, "b.txt:0");
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.rank, i);
        }
    }

    #[test]
    fn embedder_width_must_match_index() {
        let narrow = Arc::new(HashingEmbedder::new(8).unwrap());
        assert!(matches!(
            RetrievalEngine::new(index(), narrow),
            Err(Error::DimensionMismatch { expected: 384, actual: 8 })
        ));
    }
}
