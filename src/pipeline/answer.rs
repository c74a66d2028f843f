use super::Orchestrator;
use crate::error::{RareGenError, Result, Stage};
use crate::generation::generate_with_retry;
use crate::retrieval::RetrievalResult;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-call parameters for [`Orchestrator::answer`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerOptions {
    /// Number of passages to retrieve (at least 1)
    pub k: usize,
    /// Sampling temperature in [0, 1]
    pub temperature: f32,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            k: 5,
            temperature: 0.2,
        }
    }
}

impl AnswerOptions {
    fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(RareGenError::InputInvalid("k must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(RareGenError::InputInvalid(format!(
                "temperature must be in [0, 1], got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Progress of one `answer` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerState {
    EmbeddingQuery,
    Retrieving,
    PromptAssembly,
    Generating,
    Done,
    Errored(Stage),
}

impl AnswerState {
    /// The stage this state corresponds to, for error tagging
    fn stage(&self) -> Option<Stage> {
        match self {
            AnswerState::EmbeddingQuery => Some(Stage::EmbeddingQuery),
            AnswerState::Retrieving => Some(Stage::Retrieving),
            AnswerState::PromptAssembly => Some(Stage::PromptAssembly),
            AnswerState::Generating => Some(Stage::Generating),
            AnswerState::Done | AnswerState::Errored(_) => None,
        }
    }

    fn advance(&mut self, next: AnswerState) {
        debug!("answer: {} -> {}", self, next);
        *self = next;
    }

    /// Move to `Errored` and tag `err` with the stage it happened in
    fn fail(&mut self, err: RareGenError) -> RareGenError {
        let stage = self.stage().unwrap_or(Stage::Generating);
        self.advance(AnswerState::Errored(stage));
        err.at(stage)
    }
}

impl fmt::Display for AnswerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerState::Errored(stage) => write!(f, "errored({})", stage),
            AnswerState::Done => f.write_str("done"),
            other => match other.stage() {
                Some(stage) => write!(f, "{}", stage),
                None => Ok(()),
            },
        }
    }
}

/// How an answer ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerStatus {
    Complete,
    /// Evidence was retrieved but the model call failed
    GenerationFailed { reason: String },
}

/// Result of [`Orchestrator::answer`]
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedAnswer {
    pub request_id: String,
    pub text: String,
    /// Retrieved passages, best first
    pub evidence: Vec<RetrievalResult>,
    pub status: AnswerStatus,
    /// Ids of evidence items left out of the prompt to fit its budget
    pub dropped_evidence: Vec<String>,
}

impl GeneratedAnswer {
    pub fn is_complete(&self) -> bool {
        self.status == AnswerStatus::Complete
    }
}

const GENERATION_FAILED_PREFIX: &str = "[generation failed]";

impl Orchestrator {
    /// Answer a free-text case with retrieved evidence and generated text
    ///
    /// Errors from embedding, retrieval and prompt assembly are returned
    /// tagged with their stage. A generation failure is not an error: the
    /// answer comes back with the evidence intact, a `GenerationFailed`
    /// status, and text that says generation failed.
    pub async fn answer(&self, case: &str, options: &AnswerOptions) -> Result<GeneratedAnswer> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("answer", request_id = %request_id, k = options.k);
        self.answer_inner(case, options, request_id).instrument(span).await
    }

    async fn answer_inner(
        &self,
        case: &str,
        options: &AnswerOptions,
        request_id: String,
    ) -> Result<GeneratedAnswer> {
        if case.trim().is_empty() {
            return Err(RareGenError::InputInvalid("case text is empty".to_string()));
        }
        options.validate()?;

        let mut state = AnswerState::EmbeddingQuery;
        let vector = match self.retriever.embed_query(case).await {
            Ok(v) => v,
            Err(e) => return Err(state.fail(e)),
        };

        state.advance(AnswerState::Retrieving);
        let evidence = match self.retriever.search(&vector, options.k) {
            Ok(results) => results,
            Err(e) => return Err(state.fail(e)),
        };
        info!("Retrieved {} passages", evidence.len());

        state.advance(AnswerState::PromptAssembly);
        let prompt = self.assembler.assemble(case, &evidence);

        state.advance(AnswerState::Generating);
        let generated = match &self.generator {
            Some(generator) => {
                generate_with_retry(
                    generator.as_ref(),
                    &prompt.text,
                    options.temperature,
                    &self.generation_retry,
                )
                .await
            }
            None => Err(RareGenError::GenerationFailed {
                cause: "no generation model configured".to_string(),
            }),
        };

        let answer = match generated {
            Ok(text) => {
                state.advance(AnswerState::Done);
                GeneratedAnswer {
                    request_id,
                    text,
                    evidence,
                    status: AnswerStatus::Complete,
                    dropped_evidence: prompt.dropped,
                }
            }
            Err(e) => {
                let err = state.fail(e);
                error!("{}", err);
                let reason = err.root().to_string();
                warn!("Returning {} evidence item(s) without a generated answer", evidence.len());
                GeneratedAnswer {
                    request_id,
                    text: format!(
                        "{} {}. The retrieved literature is listed below without a synthesized differential.",
                        GENERATION_FAILED_PREFIX, reason
                    ),
                    evidence,
                    status: AnswerStatus::GenerationFailed { reason },
                    dropped_evidence: prompt.dropped,
                }
            }
        };

        Ok(answer)
    }
}
