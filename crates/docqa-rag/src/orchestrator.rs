use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docqa_core::config::Settings;
use docqa_core::{Answer, Error, Generator};

use crate::composer::AnswerComposer;
use crate::retrieval::RetrievalEngine;

pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_CONTEXT_BUDGET: usize = 4000;

/// Pipeline step an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Retrieval,
    Composition,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::Retrieval => "retrieval",
            Self::Composition => "composition",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Retrieving = 1,
    Composing = 2,
    Done = 3,
    Failed = 4,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Retrieving,
            2 => Self::Composing,
            3 => Self::Done,
            4 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct AskError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl AskError {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }

    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// Observable progress of one ask. Shared with the worker when the ask runs under a deadline.
#[derive(Debug)]
pub struct PipelineTracker {
    state: AtomicU8,
    stage: AtomicU8,
}

impl Default for PipelineTracker {
    fn default() -> Self {
        Self { state: AtomicU8::new(PipelineState::Idle as u8), stage: AtomicU8::new(0) }
    }
}

impl PipelineTracker {
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Stage that is running, or that last ran.
    pub fn stage(&self) -> Stage {
        match self.stage.load(Ordering::SeqCst) {
            1 => Stage::Retrieval,
            2 => Stage::Composition,
            _ => Stage::Validation,
        }
    }

    fn advance(&self, to: PipelineState) {
        let from = PipelineState::from_u8(self.state.swap(to as u8, Ordering::SeqCst));
        match to {
            PipelineState::Retrieving => self.stage.store(1, Ordering::SeqCst),
            PipelineState::Composing => self.stage.store(2, Ordering::SeqCst),
            _ => {}
        }
        tracing::debug!(?from, ?to, "pipeline transition");
    }

    fn fail(&self, stage: Stage, source: Error) -> AskError {
        self.advance(PipelineState::Failed);
        tracing::warn!(%stage, error = %source, "ask failed");
        AskError::new(stage, source)
    }
}

/// Runs retrieval then composition for one question.
///
/// Cheap to clone; clones share the engine, composer and generator.
#[derive(Clone)]
pub struct QueryOrchestrator {
    retrieval: Arc<RetrievalEngine>,
    composer: Arc<AnswerComposer>,
    generator: Arc<dyn Generator>,
    context_budget: usize,
    default_k: usize,
}

impl QueryOrchestrator {
    pub fn new(retrieval: RetrievalEngine, composer: AnswerComposer, generator: Arc<dyn Generator>) -> Self {
        Self {
            retrieval: Arc::new(retrieval),
            composer: Arc::new(composer),
            generator,
            context_budget: DEFAULT_CONTEXT_BUDGET,
            default_k: DEFAULT_TOP_K,
        }
    }

    pub fn from_settings(retrieval: RetrievalEngine, generator: Arc<dyn Generator>, settings: &Settings) -> Self {
        Self::new(retrieval, AnswerComposer::from_settings(&settings.generation), generator)
            .with_context_budget(settings.generation.context_budget)
            .with_default_k(settings.retrieval.top_k)
    }

    #[must_use]
    pub fn with_context_budget(mut self, budget: usize) -> Self {
        self.context_budget = budget;
        self
    }

    #[must_use]
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k.max(1);
        self
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    pub fn ask(&self, question: &str, k: usize) -> Result<Answer, AskError> {
        self.ask_tracked(question, k, &PipelineTracker::default())
    }

    pub fn ask_default(&self, question: &str) -> Result<Answer, AskError> {
        self.ask(question, self.default_k)
    }

    /// Like [`Self::ask`], reporting progress through `tracker`.
    pub fn ask_tracked(&self, question: &str, k: usize, tracker: &PipelineTracker) -> Result<Answer, AskError> {
        if question.trim().is_empty() {
            return Err(AskError::new(Stage::Validation, Error::InvalidArgument("question must not be empty".into())));
        }
        if k == 0 {
            return Err(AskError::new(Stage::Validation, Error::InvalidArgument("k must be at least 1".into())));
        }

        tracker.advance(PipelineState::Retrieving);
        let results = self.retrieval.retrieve(question, k).map_err(|e| tracker.fail(Stage::Retrieval, e))?;

        tracker.advance(PipelineState::Composing);
        let answer = self
            .composer
            .compose(question, &results, self.context_budget, self.generator.as_ref())
            .map_err(|e| tracker.fail(Stage::Composition, e))?;

        tracker.advance(PipelineState::Done);
        tracing::info!(k, supporting = answer.supporting_chunks.len(), unanswerable = answer.unanswerable, "question answered");
        Ok(answer)
    }

    /// Runs the ask on the blocking pool and gives up after `timeout`.
    ///
    /// On expiry the error is `Timeout` tagged with the stage in flight. The worker
    /// is left to finish on its own; its result is discarded. A worker dropped by a
    /// shutting-down runtime gives `Cancelled`.
    pub async fn ask_with_timeout(&self, question: &str, k: usize, timeout: Duration) -> Result<Answer, AskError> {
        let tracker = Arc::new(PipelineTracker::default());
        let worker = {
            let this = self.clone();
            let question = question.to_string();
            let tracker = Arc::clone(&tracker);
            tokio::task::spawn_blocking(move || this.ask_tracked(&question, k, &tracker))
        };
        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(worker_failed(tracker.stage(), join)),
            Err(_) => {
                let stage = tracker.stage();
                tracing::warn!(%stage, ?timeout, "ask timed out");
                Err(AskError::new(stage, Error::Timeout(timeout)))
            }
        }
    }
}

/// A worker panic is re-raised on the caller; any other join failure means the
/// runtime dropped the task before it finished.
fn worker_failed(stage: Stage, join: tokio::task::JoinError) -> AskError {
    if join.is_panic() {
        std::panic::resume_unwind(join.into_panic());
    }
    tracing::warn!(%stage, "ask worker was cancelled");
    AskError::new(stage, Error::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cancelled_join() -> tokio::task::JoinError {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        handle.await.unwrap_err()
    }

    #[tokio::test]
    async fn cancelled_worker_is_not_a_timeout() {
        let err = worker_failed(Stage::Retrieval, cancelled_join().await);
        assert_eq!(err.stage, Stage::Retrieval);
        assert!(matches!(err.source, Error::Cancelled));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    #[should_panic(expected = "worker blew up")]
    async fn worker_panics_propagate() {
        let join = tokio::spawn(async { panic!("worker blew up") }).await.unwrap_err();
        worker_failed(Stage::Composition, join);
    }
}
