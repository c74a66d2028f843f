//! Corpus acquisition
//!
//! A `DocumentSource` turns a topic query into raw text records. Failures on
//! individual records are skipped and counted; only a batch that produces
//! nothing at all is reported as `SourceUnavailable`.

mod pubmed;

pub use pubmed::PubMedSource;

use crate::error::{RareGenError, Result};
use crate::passage::SourceTag;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;

/// One unit of raw text as delivered by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Identifier of the record at its origin (PMID, corpus row id, ...)
    pub source_ref: String,
    pub text: String,
    pub tag: SourceTag,
}

/// Outcome of a single `fetch` call
#[derive(Debug, Default)]
pub struct FetchReport {
    pub records: Vec<RawRecord>,
    /// Records that were found but could not be retrieved
    pub skipped: usize,
}

/// Fetches raw text records for a topic query
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &str;

    /// Fetch up to `limit` records for `query` (`limit >= 1`)
    async fn fetch(&self, query: &str, limit: usize) -> Result<FetchReport>;
}

/// A fixed, in-memory corpus
///
/// Ignores the query and hands out up to `limit` records in insertion order.
/// Used for local corpora and offline builds.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    records: Vec<RawRecord>,
}

impl StaticSource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _query: &str, limit: usize) -> Result<FetchReport> {
        if limit == 0 {
            return Err(RareGenError::InputInvalid(
                "Fetch limit must be at least 1".to_string(),
            ));
        }

        Ok(FetchReport {
            records: self.records.iter().take(limit).cloned().collect(),
            skipped: 0,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CorpusRow {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    source: Option<String>,
}

/// Load a JSONL corpus file: one `{"id"?, "text", "source"?}` object per line
///
/// Rows without an id are content-addressed (BLAKE3 of the text) so that
/// reloading the same file produces the same passage ids.
pub fn load_corpus(path: &Path) -> Result<Vec<RawRecord>> {
    let file = std::fs::File::open(path).map_err(|e| RareGenError::Io {
        source: e,
        context: format!("Failed to open corpus file: {}", path.display()),
    })?;

    let mut records = Vec::new();
    for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| RareGenError::Io {
            source: e,
            context: format!("Failed to read corpus line {}", line_no + 1),
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let row: CorpusRow = serde_json::from_str(&line).map_err(|e| RareGenError::Json {
            source: e,
            context: format!("Invalid corpus row at line {}", line_no + 1),
        })?;

        let tag = match row.source.as_deref() {
            Some(s) => s.parse()?,
            None => SourceTag::Other,
        };
        let source_ref = row
            .id
            .unwrap_or_else(|| blake3::hash(row.text.as_bytes()).to_hex()[..16].to_string());

        records.push(RawRecord {
            source_ref,
            text: row.text,
            tag,
        });
    }

    tracing::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}
