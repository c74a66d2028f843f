//! Query-time retrieval
//!
//! Embeds a free-text case with the same model used at ingest and asks the
//! index for the nearest passages.

use crate::chunking::clean_text;
use crate::embedding::EmbeddingProvider;
use crate::error::{RareGenError, Result, Stage};
use crate::passage::Passage;
use crate::storage::IndexHandle;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A passage with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub passage: Passage,
    /// Cosine similarity in [-1, 1]; higher is more relevant
    pub score: f32,
}

impl RetrievalResult {
    pub fn preview(&self, max_chars: usize) -> String {
        self.passage.preview(max_chars)
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: IndexHandle,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: IndexHandle) -> Self {
        Self { embedder, index }
    }

    /// Embed query text, normalized the same way passages are
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let text = clean_text(query);
        let embedder = self.embedder.clone();

        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| RareGenError::EmbeddingFailed(format!("embedding task aborted: {}", e)))??;

        Ok(vector)
    }

    pub fn search(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        let results = self.index.search(vector, k)?;
        debug!(
            "Retrieved {} of {} requested passages (index size {})",
            results.len(),
            k,
            self.index.len()
        );
        Ok(results)
    }

    /// Embed and search in one call, tagging failures with their stage
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        let vector = self
            .embed_query(query)
            .await
            .map_err(|e| e.at(Stage::EmbeddingQuery))?;
        self.search(&vector, k).map_err(|e| e.at(Stage::Retrieving))
    }
}
