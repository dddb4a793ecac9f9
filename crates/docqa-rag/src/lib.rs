//! docqa-rag
//!
//! Question answering over a [`docqa_vector::VectorIndex`]: retrieval, context
//! assembly with provenance, a single generation call, and the orchestrator
//! that ties them together.
pub mod composer;
pub mod orchestrator;
pub mod retrieval;

pub use composer::{AnswerComposer, Context, DEFAULT_SENTINEL, NO_CONTEXT};
pub use orchestrator::{AskError, PipelineState, PipelineTracker, QueryOrchestrator, Stage};
pub use retrieval::RetrievalEngine;
