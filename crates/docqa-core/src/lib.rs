//! Core types, error taxonomy, collaborator traits, configuration and chunking
//! for the docqa pipeline.
pub mod chunker;
pub mod config;
pub mod error;
pub mod loader;
pub mod traits;
pub mod types;

pub use chunker::Chunker;
pub use error::{Error, Result};
pub use traits::{Embedder, Generator, SearchBackend};
pub use types::{Answer, Chunk, ChunkId, EmbeddedChunk, Meta, Metric, Query, SearchResult, SourceSpan};
