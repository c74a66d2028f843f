use raregen::embedding::{EmbeddingProvider, HashEmbedder};
use raregen::error::RareGenError;
use raregen::passage::{passage_id, Passage, SourceTag};
use raregen::storage::{Database, VectorIndex};
use std::sync::Arc;
use tempfile::TempDir;

fn passage(source_ref: &str, text: &str, tag: SourceTag) -> Passage {
    Passage {
        id: passage_id(tag, source_ref, 0),
        text: text.to_string(),
        source_tag: tag,
        source_ref: source_ref.to_string(),
        position: 0,
    }
}

fn texts() -> Vec<(&'static str, &'static str, SourceTag)> {
    vec![
        ("31000001", "Adult-onset Still disease with quotidian fever and salmon rash.", SourceTag::PubMed),
        ("31000002", "Castleman disease presenting with lymphadenopathy and fever.", SourceTag::PubMed),
        ("EULAR-7", "Guideline: evaluation of fever of unknown origin in adults.", SourceTag::Guideline),
    ]
}

#[test]
fn test_index_survives_restart() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("kb.sqlite");
    let embedder = HashEmbedder::new(96).unwrap();

    let query = embedder.embed("fever and rash").unwrap();
    let before = {
        let index = VectorIndex::open_path(&db_path, "cdss", embedder.model_name(), 96)
            .expect("Failed to open index");
        for (r, text, tag) in texts() {
            index
                .upsert(&passage(r, text, tag), &embedder.embed(text).unwrap())
                .unwrap();
        }
        index.persist().unwrap();
        index.search(&query, 10).unwrap()
    };
    println!("✓ Wrote {} passages", before.len());

    let reopened = VectorIndex::open_path(&db_path, "cdss", embedder.model_name(), 96).unwrap();
    assert_eq!(reopened.len(), 3);

    let after = reopened.search(&query, 10).unwrap();
    assert_eq!(before, after);

    let stats = reopened.stats().unwrap();
    assert_eq!(stats.by_source.get("pubmed"), Some(&2));
    assert_eq!(stats.by_source.get("guideline"), Some(&1));
    println!("✓ Reloaded index matches: {:?}", stats.by_source);
}

#[test]
fn test_empty_index_reopens() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("kb.sqlite");

    drop(VectorIndex::open_path(&db_path, "cdss", "hash-16", 16).unwrap());

    let index = VectorIndex::open_path(&db_path, "cdss", "hash-16", 16).unwrap();
    assert!(index.is_empty());
    assert!(index.search(&[0.5; 16], 3).unwrap().is_empty());
}

#[test]
fn test_dimension_mismatch_on_reopen() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("kb.sqlite");

    let small = HashEmbedder::new(32).unwrap();
    {
        let index = VectorIndex::open_path(&db_path, "cdss", small.model_name(), 32).unwrap();
        index
            .upsert(&passage("1", "fever", SourceTag::PubMed), &small.embed("fever").unwrap())
            .unwrap();
    }

    let large = HashEmbedder::new(64).unwrap();
    let err = VectorIndex::open_path(&db_path, "cdss", large.model_name(), 64)
        .err()
        .expect("opening with a different dimension must fail");

    match err {
        RareGenError::SchemaMismatch {
            collection,
            expected,
            actual,
        } => {
            assert_eq!(collection, "cdss");
            assert_eq!(expected, 32);
            assert_eq!(actual, 64);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_model_name_change_same_dimension_opens() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("kb.sqlite");

    {
        let index = VectorIndex::open_path(&db_path, "cdss", "bge-small-en-v1.5", 8).unwrap();
        index
            .upsert(&passage("1", "fever", SourceTag::PubMed), &[1.0; 8])
            .unwrap();
    }

    let index = VectorIndex::open_path(&db_path, "cdss", "all-MiniLM-L6-v2", 8).unwrap();
    assert_eq!(index.len(), 1);
}

#[test]
fn test_collections_are_isolated() {
    let temp = TempDir::new().unwrap();
    let db = Arc::new(Database::new(&temp.path().join("kb.sqlite")).unwrap());

    let a = VectorIndex::open(db.clone(), "a", "m", 4).unwrap();
    let b = VectorIndex::open(db.clone(), "b", "m", 8).unwrap();
    a.upsert(&passage("1", "x", SourceTag::Other), &[1.0, 0.0, 0.0, 0.0]).unwrap();

    assert_eq!(a.len(), 1);
    assert!(b.is_empty());

    let stats = db.stats().unwrap();
    assert_eq!(stats.collection_count, 2);
    assert_eq!(stats.passage_count, 1);
}

#[test]
fn test_unreadable_file_is_index_corrupt() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("kb.sqlite");
    std::fs::write(&db_path, vec![0x42u8; 8192]).unwrap();

    let err = VectorIndex::open_path(&db_path, "cdss", "hash-16", 16)
        .err()
        .expect("garbage file must not open");
    assert!(matches!(err, RareGenError::IndexCorrupt(_)));
}

#[test]
fn test_truncated_vector_is_index_corrupt() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("kb.sqlite");

    {
        let index = VectorIndex::open_path(&db_path, "cdss", "m", 4).unwrap();
        index
            .upsert(&passage("1", "x", SourceTag::PubMed), &[1.0, 2.0, 3.0, 4.0])
            .unwrap();
    }

    {
        let db = Database::new(&db_path).unwrap();
        db.get_conn()
            .unwrap()
            .execute("UPDATE passages SET vector = x'0000'", [])
            .unwrap();
    }

    let err = VectorIndex::open_path(&db_path, "cdss", "m", 4)
        .err()
        .expect("bad vector blob must not load");
    assert!(matches!(err, RareGenError::IndexCorrupt(_)));
}
