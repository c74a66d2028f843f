use crate::config::Config;
use crate::error::{RareGenError, Result, ValidationError};

const SUPPORTED_EMBEDDING_PROVIDERS: [&str; 2] = ["fastembed", "hash"];
const SUPPORTED_LLM_PROVIDERS: [&str; 1] = ["gemini"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_source(config, &mut errors);
        Self::validate_ingest(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_llm(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RareGenError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.collection.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.collection",
                "Collection name cannot be empty",
            ));
        }
    }

    fn validate_source(config: &Config, errors: &mut Vec<ValidationError>) {
        if !config.source.base_url.starts_with("http") {
            errors.push(ValidationError::new(
                "source.base_url",
                format!("Not an HTTP(S) URL: {}", config.source.base_url),
            ));
        }

        // NCBI blocks anonymous bulk access
        if !config.source.email.contains('@') {
            errors.push(ValidationError::new(
                "source.email",
                "A contact email address is required",
            ));
        }

        if config.source.max_attempts == 0 {
            errors.push(ValidationError::new(
                "source.max_attempts",
                "At least one attempt is required",
            ));
        }
    }

    fn validate_ingest(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.ingest.per_query_limit == 0 {
            errors.push(ValidationError::new(
                "ingest.per_query_limit",
                "Per-query limit must be at least 1",
            ));
        }

        if config.ingest.queries.iter().any(|q| q.trim().is_empty()) {
            errors.push(ValidationError::new(
                "ingest.queries",
                "Topic queries cannot be empty",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;
        if chunking.max_chars == 0 {
            errors.push(ValidationError::new(
                "chunking.max_chars",
                "Maximum passage length must be greater than 0",
            ));
        }

        if chunking.overlap >= chunking.max_chars {
            errors.push(ValidationError::new(
                "chunking.overlap",
                format!(
                    "Overlap ({}) must be smaller than max_chars ({})",
                    chunking.overlap, chunking.max_chars
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        if !SUPPORTED_EMBEDDING_PROVIDERS.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    SUPPORTED_EMBEDDING_PROVIDERS, provider
                ),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.workers == 0 {
            errors.push(ValidationError::new(
                "embedding.workers",
                "Worker count must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "k must be at least 1",
            ));
        }

        if config.prompt.max_prompt_chars == 0 || config.prompt.passage_chars == 0 {
            errors.push(ValidationError::new(
                "prompt",
                "Prompt limits must be greater than 0",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let temp = config.llm.temperature;
        if !(0.0..=1.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 1.0, got {}", temp),
            ));
        }

        let provider = &config.llm.provider;
        if !SUPPORTED_LLM_PROVIDERS.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    SUPPORTED_LLM_PROVIDERS, provider
                ),
            ));
        }

        if config.llm.api_key_env.is_empty() {
            errors.push(ValidationError::new(
                "llm.api_key_env",
                "API key environment variable name cannot be empty",
            ));
        }
    }
}
