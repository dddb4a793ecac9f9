use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Index has not been built")]
    IndexNotBuilt,

    #[error("No index snapshot found at {}", .0.display())]
    IndexNotFound(PathBuf),

    #[error("Corrupt index snapshot: {0}")]
    CorruptIndex(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Duplicate chunk id: {0}")]
    DuplicateChunk(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Generation rejected: {0}")]
    GenerationRejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task was cancelled before it finished")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl Error {
    /// Transient failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GenerationUnavailable(_) | Self::Timeout(_))
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
