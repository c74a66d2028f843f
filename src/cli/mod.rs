//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "raregen",
    version,
    about = "Literature-grounded differential diagnosis for rare diseases",
    long_about = "RareGen builds a local knowledge base of biomedical abstracts, retrieves the passages \
                  most similar to a patient case, and asks a generative model for a ranked differential \
                  diagnosis grounded on that evidence."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/raregen/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config file
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or extend the knowledge base
    Ingest {
        /// Topic query (repeatable; defaults to the configured queries)
        #[arg(short, long = "query", value_name = "QUERY")]
        queries: Vec<String>,

        /// Results per query
        #[arg(short, long)]
        limit: Option<usize>,

        /// Ingest a local JSONL corpus instead of querying PubMed
        #[arg(long, value_name = "FILE")]
        corpus: Option<PathBuf>,

        /// Drop the collection first and rebuild it under the current model
        #[arg(long)]
        rebuild: bool,
    },

    /// Ask for a differential diagnosis for a patient case
    Ask {
        /// Patient symptoms and history (read from stdin when omitted)
        case: Option<String>,

        /// Number of passages to retrieve
        #[arg(short)]
        k: Option<usize>,

        /// Sampling temperature in [0, 1]
        #[arg(short, long)]
        temperature: Option<f32>,

        /// Only retrieve evidence; skip the generation call
        #[arg(long)]
        no_generate: bool,

        /// Print the full answer as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show knowledge base status
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
