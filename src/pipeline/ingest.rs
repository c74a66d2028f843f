use super::Orchestrator;
use crate::embedding::BatchProcessor;
use crate::error::{RareGenError, Result};
use crate::source::{DocumentSource, RawRecord};
use serde::Serialize;
use tracing::{info, warn};

/// Summary of one ingestion run
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    /// Topic queries that returned records
    pub queries_ok: usize,
    /// Topic queries that failed outright
    pub queries_failed: Vec<String>,
    /// Raw records received
    pub records: usize,
    /// Records the source could not retrieve
    pub records_skipped: usize,
    /// Distinct passages produced by the chunker
    pub passages: usize,
    /// Passages written to the index
    pub indexed: usize,
    /// Passages that failed to embed or write
    pub failed: usize,
    /// Index size after the run
    pub index_size: usize,
    pub duration_ms: u64,
}

impl Orchestrator {
    /// Fetch `limit` records per query from `source` and index them
    ///
    /// A query that fails is logged and skipped. `SourceUnavailable` is
    /// returned only when every query failed. Passage ids are derived from
    /// (source, position), so running the same ingest twice leaves the index
    /// unchanged.
    pub async fn ingest(
        &self,
        source: &dyn DocumentSource,
        queries: &[String],
        limit: usize,
    ) -> Result<IngestReport> {
        if queries.is_empty() {
            return Err(RareGenError::InputInvalid(
                "At least one topic query is required".to_string(),
            ));
        }
        if limit == 0 {
            return Err(RareGenError::InputInvalid(
                "Per-query limit must be at least 1".to_string(),
            ));
        }

        let mut records: Vec<RawRecord> = Vec::new();
        let mut skipped = 0;
        let mut failed_queries = Vec::new();

        for query in queries {
            info!("Fetching up to {} records from {} for '{}'", limit, source.name(), query);
            match source.fetch(query, limit).await {
                Ok(report) => {
                    skipped += report.skipped;
                    records.extend(report.records);
                }
                Err(e) => {
                    warn!("Query '{}' failed, continuing with the rest: {}", query, e);
                    failed_queries.push(query.clone());
                }
            }
        }

        if failed_queries.len() == queries.len() {
            return Err(RareGenError::SourceUnavailable(format!(
                "All {} queries against {} failed",
                queries.len(),
                source.name()
            )));
        }

        let mut report = self.ingest_records(&records).await?;
        report.queries_ok = queries.len() - failed_queries.len();
        report.queries_failed = failed_queries;
        report.records_skipped = skipped;
        Ok(report)
    }

    /// Chunk, embed and index records that are already in hand
    pub async fn ingest_records(&self, records: &[RawRecord]) -> Result<IngestReport> {
        let passages = self.chunker.normalize_all(records);
        let passage_count = passages.len();

        let processor = BatchProcessor::new(
            self.embedder.clone(),
            self.index.clone(),
            self.batch_size,
            self.workers,
        );
        let result = processor.process(passages).await?;

        let report = IngestReport {
            records: records.len(),
            passages: passage_count,
            indexed: result.processed,
            failed: result.failed,
            index_size: self.index.len(),
            duration_ms: result.duration_ms,
            ..IngestReport::default()
        };

        info!(
            "Ingested {} records into {} passages ({} indexed, {} failed); index holds {}",
            report.records, report.passages, report.indexed, report.failed, report.index_size
        );

        Ok(report)
    }
}
