//! Generative model access
//!
//! The pipeline only sees the [`Generator`] trait. Failures are classified so
//! that transient ones get a bounded retry and everything ends up as
//! `GenerationFailed` carrying the cause.

mod gemini;

pub use gemini::GeminiGenerator;

use crate::config::LlmConfig;
use crate::error::{RareGenError, Result};
use crate::retry::{with_retry, RetryPolicy, Transient};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    /// Network trouble, rate limiting, server faults
    #[error("transient failure: {0}")]
    Transient(String),

    /// Auth, quota, malformed request or response
    #[error("{0}")]
    Permanent(String),
}

impl Transient for GenerationError {
    fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    /// Generate free text for `prompt`; `temperature` is in [0, 1]
    async fn generate(&self, prompt: &str, temperature: f32) -> std::result::Result<String, GenerationError>;
}

/// Retry policy for a generator: `max_retries` extra attempts on transient errors
pub fn retry_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries.saturating_add(1), Duration::from_millis(500))
}

/// Call `generator`, retrying transient failures per `policy`
pub async fn generate_with_retry(
    generator: &dyn Generator,
    prompt: &str,
    temperature: f32,
    policy: &RetryPolicy,
) -> Result<String> {
    with_retry(policy, generator.name(), || generator.generate(prompt, temperature))
        .await
        .map_err(|e| RareGenError::GenerationFailed {
            cause: e.to_string(),
        })
}

/// Build the generator named in the configuration
///
/// The API key is read from the environment variable `config.api_key_env`.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "gemini" => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    RareGenError::Config(format!(
                        "No API key found; set the {} environment variable",
                        config.api_key_env
                    ))
                })?;
            Ok(Arc::new(GeminiGenerator::new(config, api_key)?))
        }
        other => Err(RareGenError::Config(format!(
            "Unsupported LLM provider: {}",
            other
        ))),
    }
}
