mod batch;
mod hashing;
/// Embedding & ingestion batching
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - HashEmbedder for model-free, deterministic embedding
/// - BatchProcessor: bounded worker pool feeding a single index writer
mod provider;

pub use batch::{BatchProcessor, BatchResult};
pub use hashing::HashEmbedder;
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

use crate::config::EmbeddingConfig;
use crate::error::{RareGenError, Result};
use std::sync::Arc;

/// Build the embedding provider named in the configuration
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "fastembed" => Ok(Arc::new(FastEmbedProvider::new(&config.model)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimension)?)),
        other => Err(RareGenError::Config(format!(
            "Unsupported embedding provider: {}",
            other
        ))),
    }
}

/// Cosine similarity; 0.0 when either vector has zero length or the
/// result is not finite
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    let score = dot / denom;
    if !score.is_finite() || denom <= f32::EPSILON {
        0.0
    } else {
        score
    }
}
