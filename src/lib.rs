//! RareGen - literature-grounded differential diagnosis
//!
//! Builds a persistent knowledge base of biomedical abstracts (PubMed or a
//! local corpus), retrieves the passages closest to a free-text patient case,
//! and asks a generative model for a ranked differential grounded on them.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod passage;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod retry;
pub mod source;
pub mod storage;

pub use error::{RareGenError, Result, Stage};
pub use passage::{Passage, SourceTag};
pub use pipeline::{AnswerOptions, GeneratedAnswer, IngestReport, Orchestrator};
pub use retrieval::RetrievalResult;
pub use storage::{IndexHandle, VectorIndex};
