//! On-disk snapshot of a [`crate::VectorIndex`].
//!
//! A snapshot directory holds three files:
//! - `manifest.json`: format version, dimension, metric, entry count, embedder id,
//!   blake3 of `vectors.bin`, creation time
//! - `chunks.json`: chunk payloads keyed by id
//! - `vectors.bin`: slot-ordered records of `u32` LE id length, UTF-8 id, and
//!   `dimension` little-endian `f32`s
//!
//! Reading is strictly data-only and validated end to end; nothing in a snapshot
//! can name a type to instantiate.
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use docqa_core::{Chunk, EmbeddedChunk, Error, Meta, Metric, Result};
use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const VECTORS_FILE: &str = "vectors.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub format_version: u32,
    pub dimension: Option<usize>,
    pub metric: Metric,
    pub count: usize,
    pub embedder: Option<String>,
    pub vectors_blake3: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChunkRecord {
    text: String,
    source: String,
    position: usize,
    #[serde(default)]
    extra_metadata: Meta,
}

pub(crate) struct Snapshot {
    pub manifest: Manifest,
    /// Entries in slot order.
    pub entries: Vec<EmbeddedChunk>,
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptIndex(msg.into())
}

/// Reads only the manifest, e.g. for status output.
pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(Error::IndexNotFound(dir.to_path_buf()));
    }
    let bytes = fs::read(&path).map_err(|e| corrupt(format!("{MANIFEST_FILE}: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("{MANIFEST_FILE}: {e}")))
}

pub(crate) fn write(
    dir: &Path,
    metric: Metric,
    dimension: Option<usize>,
    embedder: Option<&str>,
    entries: &[&EmbeddedChunk],
) -> Result<Manifest> {
    fs::create_dir_all(dir)?;

    let mut vectors = Vec::with_capacity(entries.len() * (dimension.unwrap_or(0) * 4 + 16));
    let mut chunks: BTreeMap<&str, ChunkRecord> = BTreeMap::new();
    for e in entries {
        let id = e.chunk.id.as_bytes();
        let id_len = u32::try_from(id.len()).map_err(|_| Error::InvalidArgument(format!("chunk id too long: {}", e.chunk.id)))?;
        vectors.extend_from_slice(&id_len.to_le_bytes());
        vectors.extend_from_slice(id);
        for x in &e.vector {
            vectors.extend_from_slice(&x.to_le_bytes());
        }
        chunks.insert(
            e.chunk.id.as_str(),
            ChunkRecord {
                text: e.chunk.text.clone(),
                source: e.chunk.source.clone(),
                position: e.chunk.position,
                extra_metadata: e.chunk.extra_metadata.clone(),
            },
        );
    }

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        dimension,
        metric,
        count: entries.len(),
        embedder: embedder.map(str::to_string),
        vectors_blake3: blake3::hash(&vectors).to_hex().to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    let chunks_json = serde_json::to_vec(&chunks).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    let manifest_json = serde_json::to_vec_pretty(&manifest).map_err(|e| Error::InvalidArgument(e.to_string()))?;

    // manifest goes last: a directory with a manifest is a complete snapshot
    write_atomic(dir, VECTORS_FILE, &vectors)?;
    write_atomic(dir, CHUNKS_FILE, &chunks_json)?;
    write_atomic(dir, MANIFEST_FILE, &manifest_json)?;
    Ok(manifest)
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(name)).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

pub(crate) fn read(dir: &Path) -> Result<Snapshot> {
    let manifest = read_manifest(dir)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", manifest.format_version)));
    }
    let dim = match (manifest.dimension, manifest.count) {
        (Some(0), _) => return Err(corrupt("dimension must be positive")),
        (None, 0) => 0,
        (None, _) => return Err(corrupt("non-empty snapshot without a dimension")),
        (Some(d), _) => d,
    };

    let chunks_bytes = fs::read(dir.join(CHUNKS_FILE)).map_err(|e| corrupt(format!("{CHUNKS_FILE}: {e}")))?;
    let mut records: BTreeMap<String, ChunkRecord> =
        serde_json::from_slice(&chunks_bytes).map_err(|e| corrupt(format!("{CHUNKS_FILE}: {e}")))?;

    let vectors = fs::read(dir.join(VECTORS_FILE)).map_err(|e| corrupt(format!("{VECTORS_FILE}: {e}")))?;
    if blake3::hash(&vectors).to_hex().as_str() != manifest.vectors_blake3 {
        return Err(corrupt(format!("{VECTORS_FILE} checksum mismatch")));
    }
    // the manifest is not covered by the checksum; its sizes must fit the payload
    let min_record = dim.checked_mul(4).and_then(|b| b.checked_add(4)).ok_or_else(|| corrupt(format!("dimension {dim} is too large")))?;
    if min_record > vectors.len() && !vectors.is_empty() {
        return Err(corrupt(format!("{VECTORS_FILE} is shorter than one {dim}-dimensional record")));
    }
    if manifest.count.checked_mul(min_record).map_or(true, |need| need > vectors.len()) {
        return Err(corrupt(format!("manifest count {} does not fit {VECTORS_FILE}", manifest.count)));
    }

    let mut reader = ByteReader { bytes: &vectors, pos: 0 };
    let mut entries = Vec::with_capacity(manifest.count);
    let mut seen = HashSet::new();
    while !reader.is_done() {
        let id_len = reader.u32()? as usize;
        let id = std::str::from_utf8(reader.take(id_len)?).map_err(|_| corrupt("chunk id is not UTF-8"))?.to_string();
        let mut vector = Vec::with_capacity(dim);
        for _ in 0..dim {
            vector.push(reader.f32()?);
        }
        if !seen.insert(id.clone()) {
            return Err(corrupt(format!("duplicate vector for chunk {id}")));
        }
        let record = records.remove(&id).ok_or_else(|| corrupt(format!("vector without chunk payload: {id}")))?;
        let chunk = Chunk {
            id,
            text: record.text,
            source: record.source,
            position: record.position,
            extra_metadata: record.extra_metadata,
        };
        entries.push(EmbeddedChunk::new(chunk, vector));
    }
    if let Some(orphan) = records.keys().next() {
        return Err(corrupt(format!("chunk payload without vector: {orphan}")));
    }
    if entries.len() != manifest.count {
        return Err(corrupt(format!("manifest count {} but {} entries", manifest.count, entries.len())));
    }
    Ok(Snapshot { manifest, entries })
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn is_done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len()).ok_or_else(|| corrupt(format!("{VECTORS_FILE} is truncated")))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        if v.is_finite() { Ok(v) } else { Err(corrupt("non-finite vector component")) }
    }
}
