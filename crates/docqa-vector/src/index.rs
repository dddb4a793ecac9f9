use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use docqa_core::{Chunk, ChunkId, EmbeddedChunk, Embedder, Error, Metric, Result, SearchBackend, SearchResult};

use crate::flat::FlatIndex;
use crate::snapshot;

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Chunk payloads plus a search structure over their vectors.
///
/// `slots[i]` is the id stored at backend slot `i`, and `entries` holds exactly
/// the ids in `slots`. Readers share the lock; `build`, `add`, `load` and
/// `clear` take it exclusively, after any embedding work is done.
pub struct VectorIndex {
    state: RwLock<IndexState>,
    batch_size: usize,
}

struct IndexState {
    built: bool,
    entries: HashMap<ChunkId, EmbeddedChunk>,
    slots: Vec<ChunkId>,
    backend: Box<dyn SearchBackend>,
    embedder_id: Option<String>,
}

impl IndexState {
    fn empty(backend: Box<dyn SearchBackend>) -> Self {
        Self { built: false, entries: HashMap::new(), slots: Vec::new(), backend, embedder_id: None }
    }

    fn check_insertable(&self, batch: &[EmbeddedChunk]) -> Result<()> {
        let mut batch_ids = HashSet::new();
        let mut dim = self.backend.dimension();
        for e in batch {
            if self.entries.contains_key(&e.chunk.id) || !batch_ids.insert(e.chunk.id.as_str()) {
                return Err(Error::DuplicateChunk(e.chunk.id.clone()));
            }
            match dim {
                Some(d) if d != e.dimension => return Err(Error::DimensionMismatch { expected: d, actual: e.dimension }),
                Some(_) => {}
                None => dim = Some(e.dimension),
            }
        }
        Ok(())
    }

    fn insert_all(&mut self, batch: Vec<EmbeddedChunk>) -> Result<()> {
        self.check_insertable(&batch)?;
        for e in batch {
            let slot = self.backend.insert(&e.vector)?;
            debug_assert_eq!(slot, self.slots.len());
            self.slots.push(e.chunk.id.clone());
            self.entries.insert(e.chunk.id.clone(), e);
        }
        Ok(())
    }
}

impl VectorIndex {
    /// An empty, unbuilt index over the exact [`FlatIndex`] backend.
    pub fn new(metric: Metric) -> Self {
        Self::with_backend(Box::new(FlatIndex::new(metric)))
    }

    pub fn with_backend(backend: Box<dyn SearchBackend>) -> Self {
        Self { state: RwLock::new(IndexState::empty(backend)), batch_size: DEFAULT_BATCH_SIZE }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Opens a snapshot using a [`FlatIndex`] with the snapshot's metric.
    pub fn open(dir: &Path) -> Result<Self> {
        let manifest = snapshot::read_manifest(dir)?;
        let index = Self::new(manifest.metric);
        index.load(dir)?;
        Ok(index)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        self.state.read().map_err(|_| Error::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexState>> {
        self.state.write().map_err(|_| Error::LockPoisoned)
    }

    /// Replaces the content with `chunks`. An empty slice gives a built, empty index.
    pub fn build(&self, chunks: &[Chunk], embedder: &dyn Embedder) -> Result<()> {
        self.build_with_progress(chunks, embedder, &|_| {})
    }

    /// Like [`Self::build`], calling `progress` with the number of chunks embedded so far.
    pub fn build_with_progress(&self, chunks: &[Chunk], embedder: &dyn Embedder, progress: &dyn Fn(usize)) -> Result<()> {
        let embedded = self.embed_all(chunks, embedder, progress)?;
        let mut fresh = IndexState::empty(self.read()?.backend.empty());
        fresh.insert_all(embedded)?;
        fresh.built = true;
        fresh.embedder_id = Some(embedder.id().to_string());
        *self.write()? = fresh;
        tracing::info!(chunks = chunks.len(), embedder = embedder.id(), "index built");
        Ok(())
    }

    /// Inserts `chunks` next to the existing entries. Fails without changes if any id
    /// is already stored or the dimension differs from the index.
    pub fn add(&self, chunks: &[Chunk], embedder: &dyn Embedder) -> Result<()> {
        let embedded = self.embed_all(chunks, embedder, &|_| {})?;
        let mut state = self.write()?;
        if let Some(existing) = state.embedder_id.as_deref() {
            if existing != embedder.id() {
                tracing::warn!(existing, incoming = embedder.id(), "adding vectors from a different embedder");
            }
        }
        state.insert_all(embedded)?;
        state.built = true;
        if state.embedder_id.is_none() {
            state.embedder_id = Some(embedder.id().to_string());
        }
        tracing::info!(added = chunks.len(), total = state.entries.len(), "chunks added");
        Ok(())
    }

    fn embed_all(&self, chunks: &[Chunk], embedder: &dyn Embedder, progress: &dyn Fn(usize)) -> Result<Vec<EmbeddedChunk>> {
        let mut out = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed_many(&texts)?;
            if vectors.len() != batch.len() {
                return Err(Error::EmbeddingFailure(format!("expected {} vectors, got {}", batch.len(), vectors.len())));
            }
            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != embedder.dim() {
                    return Err(Error::DimensionMismatch { expected: embedder.dim(), actual: vector.len() });
                }
                if vector.iter().any(|x| !x.is_finite()) {
                    return Err(Error::EmbeddingFailure(format!("non-finite embedding for chunk {}", chunk.id)));
                }
                out.push(EmbeddedChunk::new(chunk.clone(), vector));
            }
            progress(out.len());
        }
        Ok(out)
    }

    /// Up to `k` nearest chunks, best first; equal scores are ordered by position,
    /// then source, then id.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let state = self.read()?;
        if !state.built {
            return Err(Error::IndexNotBuilt);
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        let Some(dim) = state.backend.dimension() else { return Ok(Vec::new()) };
        if vector.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: vector.len() });
        }
        let mut hits: Vec<(f32, &Chunk)> = state
            .backend
            .search(vector, k)
            .into_iter()
            .filter_map(|(slot, score)| {
                let id = state.slots.get(slot)?;
                state.entries.get(id).map(|e| (score, &e.chunk))
            })
            .collect();
        hits.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| a.position.cmp(&b.position))
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        tracing::debug!(k, hits = hits.len(), "vector query");
        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(rank, (score, chunk))| SearchResult { chunk: chunk.clone(), score, rank })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_built(&self) -> bool {
        self.read().map(|s| s.built).unwrap_or(false)
    }

    pub fn dimension(&self) -> Option<usize> {
        self.read().ok().and_then(|s| s.backend.dimension())
    }

    pub fn metric(&self) -> Result<Metric> {
        Ok(self.read()?.backend.metric())
    }

    pub fn embedder_id(&self) -> Option<String> {
        self.read().ok().and_then(|s| s.embedder_id.clone())
    }

    pub fn get(&self, id: &str) -> Option<EmbeddedChunk> {
        self.read().ok().and_then(|s| s.entries.get(id).cloned())
    }

    /// Chunks stored for `source`, ordered by position.
    pub fn chunks_from(&self, source: &str) -> Vec<Chunk> {
        let Ok(state) = self.read() else { return Vec::new() };
        let mut chunks: Vec<Chunk> = state.entries.values().filter(|e| e.chunk.source == source).map(|e| e.chunk.clone()).collect();
        chunks.sort_by_key(|c| c.position);
        chunks
    }

    /// Drops every entry; the index returns to the unbuilt state.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.write()?;
        let backend = state.backend.empty();
        *state = IndexState::empty(backend);
        Ok(())
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let state = self.read()?;
        if !state.built {
            return Err(Error::IndexNotBuilt);
        }
        let ordered: Vec<&EmbeddedChunk> = state.slots.iter().filter_map(|id| state.entries.get(id)).collect();
        let manifest = snapshot::write(
            dir,
            state.backend.metric(),
            state.backend.dimension(),
            state.embedder_id.as_deref(),
            &ordered,
        )?;
        tracing::info!(dir = %dir.display(), count = manifest.count, "index saved");
        Ok(())
    }

    /// Replaces the content with the snapshot in `dir`. On error the index is unchanged.
    pub fn load(&self, dir: &Path) -> Result<()> {
        let snap = snapshot::read(dir)?;
        let mut fresh = IndexState::empty(self.read()?.backend.empty());
        if fresh.backend.metric() != snap.manifest.metric {
            return Err(Error::CorruptIndex(format!(
                "snapshot metric {} does not match index metric {}",
                snap.manifest.metric,
                fresh.backend.metric()
            )));
        }
        fresh.insert_all(snap.entries).map_err(|e| Error::CorruptIndex(e.to_string()))?;
        fresh.built = true;
        fresh.embedder_id = snap.manifest.embedder.clone();
        *self.write()? = fresh;
        tracing::info!(dir = %dir.display(), count = snap.manifest.count, "index loaded");
        Ok(())
    }
}
