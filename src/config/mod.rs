//! Configuration management for RareGen
//!
//! Everything tunable lives in one TOML file. Values are passed explicitly to
//! the components that need them; nothing is held in process-wide state.

use crate::error::{RareGenError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub ingest: IngestConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub prompt: PromptConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Where the knowledge base lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Fixed knowledge-base collection name
    pub collection: String,
}

impl StorageConfig {
    /// SQLite file holding the knowledge base
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.sqlite")
    }
}

/// Literature repository (NCBI E-utilities) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    /// Contact address NCBI requires on every request
    pub email: String,
    pub tool: String,
    /// Optional env var holding an NCBI API key (raises the rate limit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    /// Pause between consecutive requests
    pub request_interval_ms: u64,
}

/// Batch ingestion job inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub queries: Vec<String>,
    pub per_query_limit: usize,
}

/// Passage splitting policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum passage length in characters
    pub max_chars: usize,
    /// Characters shared between consecutive passages of one record
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1500,
            overlap: 150,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "fastembed" (local ONNX model) or "hash" (feature hashing, offline)
    pub provider: String,
    pub model: String,
    /// Vector size for the "hash" provider; fastembed models fix their own
    pub dimension: usize,
    pub batch_size: usize,
    /// Concurrent embedding workers during ingestion
    pub workers: usize,
}

/// Retrieval defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Evidence preview length shown to the user
    pub preview_chars: usize,
}

/// Prompt assembly limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Total prompt budget in characters
    pub max_prompt_chars: usize,
    /// Per-passage cap inside the evidence block
    pub passage_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: 16_000,
            passage_chars: 2000,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub base_url: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Extra attempts on transient failures
    pub max_retries: u32,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RareGenError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RareGenError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RareGenError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| RareGenError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(temperature) = overrides.temperature {
            self.llm.temperature = temperature;
        }
        if let Some(top_k) = overrides.top_k {
            self.retrieval.top_k = top_k;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RAREGEN_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("RAREGEN_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__COLLECTION" => self.storage.collection = value.to_string(),
            "SOURCE__EMAIL" => self.source.email = value.to_string(),
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__TEMPERATURE" => self.llm.temperature = parse_env(path, value)?,
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "INGEST__PER_QUERY_LIMIT" => self.ingest.per_query_limit = parse_env(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RareGenError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("raregen").join("config.toml"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RareGenError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.raregen"),
                collection: "cdss_knowledge_base".to_string(),
            },
            source: SourceConfig {
                base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
                email: "raregen@example.org".to_string(),
                tool: "raregen".to_string(),
                api_key_env: None,
                max_attempts: 3,
                backoff_ms: 500,
                timeout_secs: 30,
                request_interval_ms: 350,
            },
            ingest: IngestConfig {
                queries: vec![
                    "rare disease differential diagnosis".to_string(),
                    "clinical guidelines rare diseases".to_string(),
                    "uncommon presentation of common diseases".to_string(),
                ],
                per_query_limit: 20,
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig {
                provider: "fastembed".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                batch_size: 32,
                workers: 4,
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                preview_chars: 500,
            },
            prompt: PromptConfig::default(),
            llm: LlmConfig {
                provider: "gemini".to_string(),
                model: "gemini-1.5-flash".to_string(),
                api_key_env: "GOOGLE_API_KEY".to_string(),
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                temperature: 0.2,
                timeout_secs: 60,
                max_retries: 1,
            },
            profiles: HashMap::new(),
        }
    }
}
