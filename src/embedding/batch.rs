/// Batch processor for embedding generation and indexing
use super::EmbeddingProvider;
use crate::error::{RareGenError, Result};
use crate::passage::Passage;
use crate::storage::IndexHandle;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type EmbeddedBatch = Vec<(Passage, Vec<f32>)>;

/// Result of batch processing
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub processed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Batch processor for embedding generation and indexing
///
/// A bounded pool of embedding workers turns passages into vectors; a single
/// writer task drains their output into the index, so all index writes are
/// serialized and each batch lands atomically.
pub struct BatchProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    index: IndexHandle,
    batch_size: usize,
    max_concurrent: usize,
}

impl BatchProcessor {
    /// Create a new batch processor
    ///
    /// # Arguments
    /// * `provider` - Embedding provider
    /// * `index` - Index receiving the embedded passages
    /// * `batch_size` - Number of passages to embed in one call
    /// * `max_concurrent` - Maximum embedding batches in flight
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: IndexHandle,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            index,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Embed and index a batch of passages
    ///
    /// Failed batches are counted, not raised; the index keeps everything
    /// written before and after them.
    pub async fn process(&self, passages: Vec<Passage>) -> Result<BatchResult> {
        let start = std::time::Instant::now();
        let total = passages.len();

        info!("Starting batch processing of {} passages", total);

        let (tx, rx) = mpsc::channel::<EmbeddedBatch>(self.max_concurrent);
        let writer = tokio::spawn(index_writer(self.index.clone(), rx));

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut workers = JoinSet::new();

        for chunk in passages.chunks(self.batch_size) {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| RareGenError::Other(e.into()))?;
            let provider = self.provider.clone();
            let tx = tx.clone();
            let batch = chunk.to_vec();

            workers.spawn(async move {
                let size = batch.len();
                let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
                let embedded =
                    tokio::task::spawn_blocking(move || provider.embed_batch(&texts)).await;
                drop(permit);

                match embedded {
                    Ok(Ok(vectors)) if vectors.len() == size => {
                        let pairs: EmbeddedBatch = batch.into_iter().zip(vectors).collect();
                        if tx.send(pairs).await.is_err() {
                            warn!("Index writer stopped, dropping batch of {}", size);
                            return size;
                        }
                        debug!("Embedded batch of {} passages", size);
                        0
                    }
                    Ok(Ok(vectors)) => {
                        warn!(
                            "Embedding count mismatch: expected {}, got {}",
                            size,
                            vectors.len()
                        );
                        size
                    }
                    Ok(Err(e)) => {
                        warn!("Failed to embed batch of {}: {}", size, e);
                        size
                    }
                    Err(e) => {
                        error!("Embedding worker aborted: {}", e);
                        size
                    }
                }
            });
        }
        drop(tx);

        let mut failed = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(n) => failed += n,
                Err(e) => error!("Embedding task failed to join: {}", e),
            }
        }

        let (processed, write_failed) = writer.await.map_err(|e| RareGenError::Other(e.into()))?;
        failed += write_failed;

        self.index.persist()?;

        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Batch processing complete: {} processed, {} failed, {}ms",
            processed, failed, duration_ms
        );

        Ok(BatchResult {
            processed,
            failed,
            duration_ms,
        })
    }
}

/// Single writer: the only place ingestion touches the index
async fn index_writer(index: IndexHandle, mut rx: mpsc::Receiver<EmbeddedBatch>) -> (usize, usize) {
    let mut written = 0;
    let mut failed = 0;

    while let Some(batch) = rx.recv().await {
        let size = batch.len();
        let index = index.clone();
        match tokio::task::spawn_blocking(move || index.upsert_batch(&batch)).await {
            Ok(Ok(n)) => written += n,
            Ok(Err(e)) => {
                error!("Failed to write batch of {} to index: {}", size, e);
                failed += size;
            }
            Err(e) => {
                error!("Index write task aborted: {}", e);
                failed += size;
            }
        }
    }

    (written, failed)
}
