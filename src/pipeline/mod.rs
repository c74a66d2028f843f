//! The two public operations: `ingest` and `answer`
//!
//! An [`Orchestrator`] is built once at startup from explicitly constructed
//! components and shared by reference. It holds no per-request state, so
//! concurrent `answer` calls only share the read side of the index.

mod answer;
mod ingest;

pub use answer::{AnswerOptions, AnswerState, AnswerStatus, GeneratedAnswer};
pub use ingest::IngestReport;

use crate::chunking::Chunker;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{RareGenError, Result};
use crate::generation::{self, Generator};
use crate::prompt::PromptAssembler;
use crate::retrieval::Retriever;
use crate::retry::RetryPolicy;
use crate::storage::IndexHandle;
use std::sync::Arc;

pub struct Orchestrator {
    index: IndexHandle,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Option<Arc<dyn Generator>>,
    retriever: Retriever,
    chunker: Chunker,
    assembler: PromptAssembler,
    batch_size: usize,
    workers: usize,
    generation_retry: RetryPolicy,
}

impl Orchestrator {
    /// Wire the components together
    ///
    /// Fails with `SchemaMismatch` when the embedder and the index disagree
    /// on vector dimension. Without a generator (see [`Self::with_generator`])
    /// `answer` still retrieves evidence but reports generation as failed.
    pub fn new(index: IndexHandle, embedder: Arc<dyn EmbeddingProvider>, config: &Config) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(RareGenError::SchemaMismatch {
                collection: index.collection().to_string(),
                expected: index.dimension(),
                actual: embedder.dimension(),
            });
        }

        Ok(Self {
            retriever: Retriever::new(embedder.clone(), index.clone()),
            index,
            embedder,
            generator: None,
            chunker: Chunker::new(&config.chunking),
            assembler: PromptAssembler::new(&config.prompt),
            batch_size: config.embedding.batch_size,
            workers: config.embedding.workers,
            generation_retry: generation::retry_policy(config.llm.max_retries),
        })
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replace the generation retry policy
    pub fn with_generation_retry(mut self, policy: RetryPolicy) -> Self {
        self.generation_retry = policy;
        self
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }
}
