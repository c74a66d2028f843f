use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for RareGen
#[derive(Error, Debug)]
pub enum RareGenError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// The literature repository returned nothing usable for a whole batch
    #[error("Document source unavailable: {0}")]
    SourceUnavailable(String),

    /// Embedding model unavailable or rejected the input
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Index and embedder disagree on vector dimension
    #[error(
        "Schema mismatch for collection '{collection}': index stores {expected}-dimensional vectors, got {actual}"
    )]
    SchemaMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// Persisted index state could not be read back
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// External generation call failed after retry
    #[error("Generation failed: {cause}")]
    GenerationFailed { cause: String },

    /// Caller supplied an unusable argument
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    /// Failure tagged with the answer stage it happened in
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        source: Box<RareGenError>,
    },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RareGenError {
    /// Tag this error with the stage it surfaced in.
    ///
    /// Already-tagged errors keep their original stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            tagged @ RareGenError::Stage { .. } => tagged,
            other => RareGenError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error was raised in, if it was tagged
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RareGenError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The underlying error with any stage tag removed
    pub fn root(&self) -> &RareGenError {
        match self {
            RareGenError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Stages of a single `answer()` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    EmbeddingQuery,
    Retrieving,
    PromptAssembly,
    Generating,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::EmbeddingQuery => "embedding-query",
            Stage::Retrieving => "retrieving",
            Stage::PromptAssembly => "prompt-assembly",
            Stage::Generating => "generating",
        };
        f.write_str(name)
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for RareGen operations
pub type Result<T> = std::result::Result<T, RareGenError>;
