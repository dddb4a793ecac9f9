//! Domain types shared by the chunker, the vector index and the answer pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;
pub type Meta = BTreeMap<String, String>;

/// Metadata key carrying the 1-based page number of PDF spans.
pub const PAGE_KEY: &str = "page";

/// A bounded span of source text, the atomic unit of retrieval.
///
/// - `id`: unique chunk identifier (`"{source}:{position}"`)
/// - `source`: document identifier, usually the file path
/// - `position`: ordinal of the chunk within its source, starting at 0
/// - `extra_metadata`: loader metadata copied verbatim (e.g. `page`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub source: String,
    pub position: usize,
    #[serde(default)]
    pub extra_metadata: Meta,
}

impl Chunk {
    pub fn new(source: &str, position: usize, text: impl Into<String>, extra_metadata: Meta) -> Self {
        Self {
            id: format!("{source}:{position}"),
            text: text.into(),
            source: source.to_string(),
            position,
            extra_metadata,
        }
    }

    pub fn page(&self) -> Option<&str> {
        self.extra_metadata.get(PAGE_KEY).map(String::as_str)
    }
}

/// A chunk together with its embedding. `dimension` always equals `vector.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub dimension: usize,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        let dimension = vector.len();
        Self { chunk, vector, dimension }
    }
}

/// One unit of raw text produced by a document loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub source: String,
    pub text: String,
    pub metadata: Meta,
}

impl SourceSpan {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self { source: source.into(), text: text.into(), metadata: Meta::new() }
    }

    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A ranked hit. Higher `score` is more relevant; `rank` is 0-based.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub k: usize,
}

impl Query {
    pub fn new(text: impl Into<String>, k: usize) -> Result<Self, Error> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::InvalidArgument("question must not be empty".into()));
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        Ok(Self { text, k })
    }
}

/// Final output of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub supporting_chunks: Vec<Chunk>,
    pub unanswerable: bool,
}

/// Similarity used by an index. Fixed per index and recorded in snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Inner product of L2-normalized vectors, in `[-1, 1]`.
    #[default]
    Cosine,
    /// Raw inner product.
    InnerProduct,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "inner_product" => Ok(Self::InnerProduct),
            other => Err(Error::InvalidArgument(format!("unknown metric '{other}'"))),
        }
    }
}
