use raregen::cli::{Cli, Commands, ConfigAction};
use raregen::config::{Config, ConfigValidator};
use raregen::embedding;
use raregen::error::{RareGenError, Result};
use raregen::generation;
use raregen::pipeline::{AnswerOptions, GeneratedAnswer, Orchestrator};
use raregen::source::{load_corpus, PubMedSource};
use raregen::storage::{Database, VectorIndex};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Ingest {
            queries,
            limit,
            corpus,
            rebuild,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ingest(&config, queries, limit, corpus, rebuild)?;
        }
        Commands::Ask {
            case,
            k,
            temperature,
            no_generate,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ask(&config, case, k, temperature, no_generate, json)?;
        }
        Commands::Status { json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_status(&config, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "raregen=debug" } else { "raregen=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| RareGenError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

/// Open the configured collection, building the embedder it needs
fn open_pipeline(config: &Config, rebuild: bool) -> Result<Orchestrator> {
    let embedder = embedding::from_config(&config.embedding)?;
    let db = Arc::new(Database::new(&config.storage.database_path())?);

    let index = if rebuild {
        VectorIndex::rebuild(
            db,
            &config.storage.collection,
            embedder.model_name(),
            embedder.dimension(),
        )?
    } else {
        VectorIndex::open(
            db,
            &config.storage.collection,
            embedder.model_name(),
            embedder.dimension(),
        )?
    };

    Orchestrator::new(Arc::new(index), embedder, config)
}

fn cmd_ingest(
    config: &Config,
    queries: Vec<String>,
    limit: Option<usize>,
    corpus: Option<PathBuf>,
    rebuild: bool,
) -> Result<()> {
    let orchestrator = open_pipeline(config, rebuild)?;
    let rt = runtime()?;

    let report = match corpus {
        Some(path) => {
            tracing::info!("Ingesting local corpus {}", path.display());
            let records = load_corpus(&path)?;
            rt.block_on(orchestrator.ingest_records(&records))?
        }
        None => {
            let source = PubMedSource::new(&config.source)?;
            let queries = if queries.is_empty() {
                config.ingest.queries.clone()
            } else {
                queries
            };
            let limit = limit.unwrap_or(config.ingest.per_query_limit);
            rt.block_on(orchestrator.ingest(&source, &queries, limit))?
        }
    };

    println!("✓ Ingestion complete");
    if report.queries_ok > 0 || !report.queries_failed.is_empty() {
        println!(
            "  Queries:  {} ok, {} failed",
            report.queries_ok,
            report.queries_failed.len()
        );
        for query in &report.queries_failed {
            println!("    ✗ {}", query);
        }
    }
    println!(
        "  Records:  {} ({} skipped by the source)",
        report.records, report.records_skipped
    );
    println!(
        "  Passages: {} indexed, {} failed",
        report.indexed, report.failed
    );
    println!(
        "  Index:    {} passages in '{}'",
        report.index_size, config.storage.collection
    );

    Ok(())
}

fn cmd_ask(
    config: &Config,
    case: Option<String>,
    k: Option<usize>,
    temperature: Option<f32>,
    no_generate: bool,
    json: bool,
) -> Result<()> {
    let case = match case {
        Some(case) => case,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| RareGenError::Io {
                    source: e,
                    context: "Failed to read case from stdin".to_string(),
                })?;
            buf
        }
    };

    let mut orchestrator = open_pipeline(config, false)?;
    if orchestrator.index().is_empty() {
        tracing::warn!("Knowledge base is empty. Run 'raregen ingest' first.");
    }

    if !no_generate {
        match generation::from_config(&config.llm) {
            Ok(generator) => orchestrator = orchestrator.with_generator(generator),
            Err(e) => tracing::warn!("{}; showing evidence only", e),
        }
    }

    let options = AnswerOptions {
        k: k.unwrap_or(config.retrieval.top_k),
        temperature: temperature.unwrap_or(config.llm.temperature),
    };

    let rt = runtime()?;
    let answer = rt.block_on(orchestrator.answer(&case, &options))?;

    if json {
        let out = serde_json::to_string_pretty(&answer).map_err(|e| RareGenError::Json {
            source: e,
            context: "Failed to serialize answer".to_string(),
        })?;
        println!("{}", out);
    } else {
        print_answer(&answer, config.retrieval.preview_chars, no_generate);
    }

    Ok(())
}

fn print_answer(answer: &GeneratedAnswer, preview_chars: usize, evidence_only: bool) {
    if !evidence_only {
        println!("Differential Diagnosis Report");
        println!("=============================\n");
        println!("{}\n", answer.text);
    }

    println!("Evidence / Retrieved Context");
    println!("============================");
    if answer.evidence.is_empty() {
        println!("\n(no passages retrieved)");
    }
    for (i, result) in answer.evidence.iter().enumerate() {
        println!(
            "\nReference {} (Relevance: {:.2}) | Source: {} {}",
            i + 1,
            result.score,
            result.passage.source_tag.label(),
            result.passage.source_ref
        );
        println!("  {}", result.preview(preview_chars));
    }

    if !answer.dropped_evidence.is_empty() && !evidence_only {
        println!(
            "\nNote: {} reference(s) were left out of the prompt to fit its size budget.",
            answer.dropped_evidence.len()
        );
    }
}

fn cmd_status(config: &Config, json: bool) -> Result<()> {
    let db_path = config.storage.database_path();
    if !db_path.exists() {
        println!("No knowledge base at {}", db_path.display());
        println!("Run 'raregen ingest' to build one.");
        return Ok(());
    }

    let db = Arc::new(Database::new(&db_path)?);
    let Some(info) = db.collection_info(&config.storage.collection)? else {
        println!(
            "Collection '{}' does not exist yet in {}",
            config.storage.collection,
            db_path.display()
        );
        return Ok(());
    };

    let index = VectorIndex::open(db.clone(), &info.name, &info.model, info.dimension)?;
    let stats = index.stats()?;

    if json {
        let out = serde_json::to_string_pretty(&stats).map_err(|e| RareGenError::Json {
            source: e,
            context: "Failed to serialize status".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    let db_stats = db.stats()?;
    println!("RareGen Status");
    println!("==============");
    println!("\nDatabase:   {}", db_path.display());
    println!("Size:       {} KB", db_stats.file_size_bytes / 1024);
    println!("Collection: {} (created {})", stats.collection, info.created_at);
    println!("Model:      {} ({}D)", stats.model, stats.dimension);
    println!("Passages:   {}", stats.passages);
    for (source, count) in &stats.by_source {
        println!("  {:<10} {}", source, count);
    }

    if config.embedding.provider == "fastembed" && config.embedding.model != stats.model {
        println!(
            "\n⚠ Configured model '{}' differs from the index model. Run 'raregen ingest --rebuild'.",
            config.embedding.model
        );
    }

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| RareGenError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RareGenError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    let mut config = if path.exists() {
        match profile {
            Some(profile) => Config::load_with_profile(&path, &profile)?,
            None => Config::load(&path)?,
        }
    } else {
        tracing::warn!(
            "Config file not found, using defaults. Run 'raregen config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        ConfigValidator::validate(&config)?;
        config
    };

    config.storage.data_dir = expand_path(&config.storage.data_dir)?;
    Ok(config)
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RareGenError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| RareGenError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
