//! docqa-vector
//!
//! In-memory vector index with deterministic ranking, an exact search backend and
//! data-only snapshot persistence.
pub mod flat;
pub mod index;
pub mod snapshot;

pub use flat::FlatIndex;
pub use index::VectorIndex;
pub use snapshot::{read_manifest, Manifest};
