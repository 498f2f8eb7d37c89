//! Side-channel accumulators observed by the agent loop and its tools.

use std::sync::{Arc, Mutex, PoisonError};

use parley_ai::{TokenTracker, TokenUsage};

use crate::model::RetrievedChunk;

/// Shared token usage across every model call of a turn.
#[derive(Debug, Clone, Default)]
pub struct UsageMeter(Arc<Mutex<TokenTracker>>);

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, model: &str, usage: &TokenUsage) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(model, usage);
    }

    pub fn snapshot(&self) -> TokenTracker {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Chunks the knowledge tool actually cited.
#[derive(Debug, Clone, Default)]
pub struct ChunkCollector(Arc<Mutex<Vec<RetrievedChunk>>>);

impl ChunkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, chunks: impl IntoIterator<Item = RetrievedChunk>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(chunks);
    }

    pub fn take(&self) -> Vec<RetrievedChunk> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
