/// End-to-end tests for `ingest` and `answer`
///
/// Everything runs offline: the hashing embedder stands in for the model and
/// generators/sources are scripted in-test.
use async_trait::async_trait;
use raregen::chunking::clean_text;
use raregen::config::Config;
use raregen::embedding::{self, EmbeddingProvider, HashEmbedder};
use raregen::error::{RareGenError, Stage};
use raregen::generation::{GenerationError, Generator};
use raregen::pipeline::{AnswerOptions, AnswerStatus, Orchestrator};
use raregen::retry::RetryPolicy;
use raregen::source::{DocumentSource, FetchReport, RawRecord, StaticSource};
use raregen::storage::VectorIndex;
use raregen::{RetrievalResult, SourceTag};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DIM: usize = 256;

fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = temp.path().to_path_buf();
    config.embedding.provider = "hash".to_string();
    config.embedding.dimension = DIM;
    config.embedding.batch_size = 4;
    config.embedding.workers = 2;
    config
}

fn build(temp: &TempDir) -> Orchestrator {
    let config = test_config(temp);
    let embedder = embedding::from_config(&config.embedding).expect("hash embedder");
    let index = VectorIndex::open_path(
        &config.storage.database_path(),
        &config.storage.collection,
        embedder.model_name(),
        embedder.dimension(),
    )
    .expect("Failed to open index");

    Orchestrator::new(Arc::new(index), embedder, &config)
        .expect("Failed to build orchestrator")
        .with_generation_retry(RetryPolicy::new(2, Duration::from_millis(1)))
}

fn record(source_ref: &str, text: &str) -> RawRecord {
    RawRecord {
        source_ref: source_ref.to_string(),
        text: text.to_string(),
        tag: SourceTag::PubMed,
    }
}

fn periodic_fever_corpus() -> Vec<RawRecord> {
    vec![
        record(
            "pf-1",
            "Familial Mediterranean fever is a periodic fever syndrome with recurring attacks of fever, serositis and an erysipelas-like rash.",
        ),
        record(
            "pf-2",
            "TNF receptor-associated periodic syndrome presents with prolonged fever episodes, migratory rash and myalgia.",
        ),
        record(
            "pf-3",
            "Hyper-IgD syndrome causes periodic fever in infancy with cervical lymphadenopathy and abdominal pain.",
        ),
    ]
}

fn synthetic_corpus(n: usize) -> Vec<RawRecord> {
    let findings = [
        "fever", "rash", "lymphadenopathy", "arthralgia", "hepatomegaly", "uveitis", "seizures",
    ];
    (0..n)
        .map(|i| {
            record(
                &format!("syn-{}", i),
                &format!(
                    "Case report {}: patient presenting with {} and {} over {} weeks.",
                    i,
                    findings[i % findings.len()],
                    findings[(i / 3) % findings.len()],
                    i % 11
                ),
            )
        })
        .collect()
}

/// Returns a fixed differential regardless of the prompt
struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str, _temperature: f32) -> Result<String, GenerationError> {
        Ok(format!("1. Familial Mediterranean fever (prompt had {} chars)", prompt.len()))
    }
}

/// Always fails the way an exhausted quota does
struct QuotaExceeded;

#[async_trait]
impl Generator for QuotaExceeded {
    fn name(&self) -> &str {
        "quota"
    }

    async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String, GenerationError> {
        Err(GenerationError::Permanent("HTTP 429: quota exceeded for project".to_string()))
    }
}

/// Fails transiently a fixed number of times, then answers
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Generator for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(GenerationError::Transient("connection reset".to_string()))
        } else {
            Ok("recovered".to_string())
        }
    }
}

/// Fails any query containing "unreachable"
struct PartlyDownSource {
    records: Vec<RawRecord>,
}

#[async_trait]
impl DocumentSource for PartlyDownSource {
    fn name(&self) -> &str {
        "partly-down"
    }

    async fn fetch(&self, query: &str, limit: usize) -> raregen::Result<FetchReport> {
        if query.contains("unreachable") {
            return Err(RareGenError::SourceUnavailable("HTTP 503".to_string()));
        }
        Ok(FetchReport {
            records: self.records.iter().take(limit).cloned().collect(),
            skipped: 1,
        })
    }
}

fn assert_ordered(results: &[RetrievalResult]) {
    for pair in results.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            a.score > b.score || (a.score == b.score && a.passage.id < b.passage.id),
            "results out of order: {} ({}) before {} ({})",
            a.passage.id,
            a.score,
            b.passage.id,
            b.score
        );
    }
}

#[tokio::test]
async fn test_periodic_fever_scenario() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp).with_generator(Arc::new(EchoGenerator));

    let corpus = periodic_fever_corpus();
    let report = orchestrator.ingest_records(&corpus).await.unwrap();
    assert_eq!(report.indexed, 3);
    println!("✓ Ingested {} passages", report.indexed);

    let answer = orchestrator
        .answer("recurring fever with rash", &AnswerOptions { k: 2, temperature: 0.2 })
        .await
        .unwrap();

    assert!(answer.is_complete());
    assert_eq!(answer.evidence.len(), 2);
    assert!(answer.evidence[0].score >= answer.evidence[1].score);

    let ingested: BTreeSet<String> = corpus.iter().map(|r| r.text.clone()).collect();
    for result in &answer.evidence {
        assert!(ingested.contains(&result.passage.text));
    }
    assert!(answer.text.starts_with("1. Familial Mediterranean fever"));
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp);
    let source = StaticSource::new(synthetic_corpus(12));
    let queries = vec!["rare disease differential diagnosis".to_string()];

    orchestrator.ingest(&source, &queries, 20).await.unwrap();
    let retriever = orchestrator.retriever();
    let before = retriever.retrieve("fever and rash", 100).await.unwrap();

    orchestrator.ingest(&source, &queries, 20).await.unwrap();
    let after = retriever.retrieve("fever and rash", 100).await.unwrap();

    assert_eq!(orchestrator.index().len(), 12);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_overlapping_queries_do_not_duplicate() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp);
    // a static source returns the same records for every query
    let source = StaticSource::new(synthetic_corpus(5));
    let queries: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

    let report = orchestrator.ingest(&source, &queries, 5).await.unwrap();
    assert_eq!(report.queries_ok, 3);
    assert_eq!(report.records, 15);
    assert_eq!(report.passages, 5);
    assert_eq!(orchestrator.index().len(), 5);
}

#[tokio::test]
async fn test_retrieval_is_deterministic_and_ordered() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp);
    orchestrator.ingest_records(&synthetic_corpus(40)).await.unwrap();

    let retriever = orchestrator.retriever();
    let first = retriever.retrieve("fever with lymphadenopathy", 15).await.unwrap();
    let second = retriever.retrieve("fever with lymphadenopathy", 15).await.unwrap();

    assert_eq!(first, second);
    assert_ordered(&first);
}

#[tokio::test]
async fn test_equal_scores_ordered_by_id() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp);

    let same_text = "Periodic fever with aphthous stomatitis.";
    let corpus: Vec<RawRecord> = (0..6).map(|i| record(&format!("dup-{}", i), same_text)).collect();
    orchestrator.ingest_records(&corpus).await.unwrap();

    let results = orchestrator.retriever().retrieve(same_text, 6).await.unwrap();
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.score == results[0].score));

    let ids: Vec<&str> = results.iter().map(|r| r.passage.id.as_str()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn test_bounded_evidence() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp).with_generator(Arc::new(EchoGenerator));
    orchestrator.ingest_records(&synthetic_corpus(100)).await.unwrap();
    assert_eq!(orchestrator.index().len(), 100);

    let answer = orchestrator
        .answer("fever", &AnswerOptions { k: 3, temperature: 0.0 })
        .await
        .unwrap();
    assert_eq!(answer.evidence.len(), 3);

    let small = TempDir::new().unwrap();
    let orchestrator = build(&small).with_generator(Arc::new(EchoGenerator));
    orchestrator.ingest_records(&synthetic_corpus(5)).await.unwrap();

    let answer = orchestrator
        .answer("fever", &AnswerOptions { k: 1000, temperature: 0.0 })
        .await
        .unwrap();
    assert_eq!(answer.evidence.len(), 5);
}

#[tokio::test]
async fn test_generation_failure_keeps_evidence() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp).with_generator(Arc::new(QuotaExceeded));
    orchestrator.ingest_records(&periodic_fever_corpus()).await.unwrap();
    orchestrator.ingest_records(&synthetic_corpus(10)).await.unwrap();

    let answer = orchestrator
        .answer("fever, rash, lymphadenopathy", &AnswerOptions { k: 5, temperature: 0.2 })
        .await
        .expect("generation failure must not discard retrieval");

    assert_eq!(answer.evidence.len(), 5);
    assert!(!answer.is_complete());
    match &answer.status {
        AnswerStatus::GenerationFailed { reason } => assert!(reason.contains("quota exceeded")),
        other => panic!("unexpected status: {:?}", other),
    }
    assert!(answer.text.starts_with("[generation failed]"));
    assert!(!answer.text.starts_with("1."));
    println!("✓ Failure text: {}", answer.text);
}

#[tokio::test]
async fn test_no_generator_still_returns_evidence() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp);
    orchestrator.ingest_records(&periodic_fever_corpus()).await.unwrap();

    let answer = orchestrator
        .answer("periodic fever", &AnswerOptions::default())
        .await
        .unwrap();
    assert_eq!(answer.evidence.len(), 3);
    assert!(matches!(answer.status, AnswerStatus::GenerationFailed { .. }));
}

#[tokio::test]
async fn test_transient_generation_error_retried_once() {
    let temp = TempDir::new().unwrap();
    let flaky = Arc::new(Flaky {
        failures: 1,
        calls: AtomicU32::new(0),
    });
    let orchestrator = build(&temp).with_generator(flaky.clone());
    orchestrator.ingest_records(&periodic_fever_corpus()).await.unwrap();

    let answer = orchestrator
        .answer("recurring fever", &AnswerOptions::default())
        .await
        .unwrap();
    assert!(answer.is_complete());
    assert_eq!(answer.text, "recovered");
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

    // two transient failures exhaust the single retry
    let stubborn = Arc::new(Flaky {
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp).with_generator(stubborn.clone());
    orchestrator.ingest_records(&periodic_fever_corpus()).await.unwrap();

    let answer = orchestrator
        .answer("recurring fever", &AnswerOptions::default())
        .await
        .unwrap();
    assert!(!answer.is_complete());
    assert_eq!(stubborn.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_input() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp).with_generator(Arc::new(EchoGenerator));
    orchestrator.ingest_records(&periodic_fever_corpus()).await.unwrap();

    let err = orchestrator.answer("   ", &AnswerOptions::default()).await.unwrap_err();
    assert!(matches!(err.root(), RareGenError::InputInvalid(_)));

    let err = orchestrator
        .answer("fever", &AnswerOptions { k: 0, temperature: 0.2 })
        .await
        .unwrap_err();
    assert!(matches!(err.root(), RareGenError::InputInvalid(_)));

    let err = orchestrator
        .answer("fever", &AnswerOptions { k: 3, temperature: 1.7 })
        .await
        .unwrap_err();
    assert!(matches!(err.root(), RareGenError::InputInvalid(_)));
}

#[tokio::test]
async fn test_empty_index_answers_without_evidence() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp).with_generator(Arc::new(EchoGenerator));

    let answer = orchestrator
        .answer("fever of unknown origin", &AnswerOptions::default())
        .await
        .unwrap();
    assert!(answer.evidence.is_empty());
    assert!(answer.is_complete());
}

#[tokio::test]
async fn test_embedding_failure_is_tagged() {
    struct BrokenEmbedder;

    impl EmbeddingProvider for BrokenEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, raregen::embedding::EmbeddingError> {
            Err(raregen::embedding::EmbeddingError::GenerationError(
                "model not loaded".to_string(),
            ))
        }

        fn embed_batch(
            &self,
            _texts: &[String],
        ) -> Result<Vec<Vec<f32>>, raregen::embedding::EmbeddingError> {
            Err(raregen::embedding::EmbeddingError::GenerationError(
                "model not loaded".to_string(),
            ))
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let index = VectorIndex::open_path(&config.storage.database_path(), "kb", "broken", DIM).unwrap();
    let orchestrator = Orchestrator::new(Arc::new(index), Arc::new(BrokenEmbedder), &config).unwrap();

    let err = orchestrator
        .answer("fever", &AnswerOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::EmbeddingQuery));
    assert!(matches!(err.root(), RareGenError::EmbeddingFailed(_)));

    // ingestion counts the failures instead of raising
    let report = orchestrator.ingest_records(&periodic_fever_corpus()).await.unwrap();
    assert_eq!(report.indexed, 0);
    assert_eq!(report.failed, 3);
}

#[tokio::test]
async fn test_ingest_survives_failed_queries() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp);
    let source = PartlyDownSource {
        records: periodic_fever_corpus(),
    };

    let queries = vec![
        "periodic fever".to_string(),
        "unreachable topic".to_string(),
    ];
    let report = orchestrator.ingest(&source, &queries, 10).await.unwrap();
    assert_eq!(report.queries_ok, 1);
    assert_eq!(report.queries_failed, vec!["unreachable topic".to_string()]);
    assert_eq!(report.records_skipped, 1);
    assert_eq!(report.indexed, 3);

    let all_down = vec!["unreachable a".to_string(), "unreachable b".to_string()];
    let err = orchestrator.ingest(&source, &all_down, 10).await.unwrap_err();
    assert!(matches!(err, RareGenError::SourceUnavailable(_)));
    assert_eq!(orchestrator.index().len(), 3);
}

#[tokio::test]
async fn test_ingest_rejects_bad_arguments() {
    let temp = TempDir::new().unwrap();
    let orchestrator = build(&temp);
    let source = StaticSource::new(periodic_fever_corpus());

    let err = orchestrator.ingest(&source, &[], 5).await.unwrap_err();
    assert!(matches!(err, RareGenError::InputInvalid(_)));

    let err = orchestrator
        .ingest(&source, &["fever".to_string()], 0)
        .await
        .unwrap_err();
    assert!(matches!(err, RareGenError::InputInvalid(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_answers() {
    let temp = TempDir::new().unwrap();
    let orchestrator = Arc::new(build(&temp).with_generator(Arc::new(EchoGenerator)));
    orchestrator.ingest_records(&synthetic_corpus(30)).await.unwrap();

    let expected = orchestrator
        .answer("fever and rash", &AnswerOptions::default())
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .answer("fever and rash", &AnswerOptions::default())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut request_ids = BTreeSet::new();
    for handle in handles {
        let answer = handle.await.unwrap();
        assert_eq!(answer.evidence, expected.evidence);
        request_ids.insert(answer.request_id);
    }
    assert_eq!(request_ids.len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_ingest_see_whole_entries() {
    let temp = TempDir::new().unwrap();
    let orchestrator = Arc::new(build(&temp));
    let corpus = synthetic_corpus(400);
    let expected: HashMap<String, String> = corpus
        .iter()
        .map(|r| (r.source_ref.clone(), clean_text(&r.text)))
        .collect();

    let ingest = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.ingest_records(&corpus).await })
    };

    let k = 5;
    let mut reads = 0;
    let mut saw_partial_index = false;
    while !ingest.is_finished() || reads < 20 {
        let before = orchestrator.index().len();
        let results = orchestrator
            .retriever()
            .retrieve("fever and rash", k)
            .await
            .unwrap();
        let after = orchestrator.index().len();

        assert!(results.len() >= k.min(before) && results.len() <= k.min(after));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        for result in &results {
            let passage = &result.passage;
            assert_eq!(Some(&passage.text), expected.get(&passage.source_ref));
            let (_, vector) = orchestrator.index().get(&passage.id).unwrap();
            assert_eq!(vector.len(), DIM);
        }

        if after > 0 && after < 400 {
            saw_partial_index = true;
        }
        reads += 1;
        tokio::task::yield_now().await;
    }

    let report = ingest.await.unwrap().unwrap();
    assert_eq!(report.indexed, 400);
    assert_eq!(orchestrator.index().len(), 400);
    println!(
        "✓ {} reads during ingest (partial index observed: {})",
        reads, saw_partial_index
    );
}

#[test]
fn test_orchestrator_rejects_dimension_mismatch() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let index = VectorIndex::open_path(&config.storage.database_path(), "kb", "hash-64", 64).unwrap();

    let err = Orchestrator::new(
        Arc::new(index),
        Arc::new(HashEmbedder::new(128).unwrap()),
        &config,
    )
    .err()
    .unwrap();
    assert!(matches!(
        err,
        RareGenError::SchemaMismatch {
            expected: 64,
            actual: 128,
            ..
        }
    ));
}
