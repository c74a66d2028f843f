//! Persistent vector index over embedded passages
//!
//! Every passage lives in SQLite and in an in-memory map keyed by id. Search
//! is exact: cosine similarity against every stored vector.

use super::Database;
use crate::embedding::cosine_similarity;
use crate::error::{RareGenError, Result};
use crate::passage::{Passage, SourceTag};
use crate::retrieval::RetrievalResult;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Shared handle; queries read concurrently, the ingest writer takes the
/// write lock per batch
pub type IndexHandle = Arc<VectorIndex>;

struct Entry {
    passage: Passage,
    vector: Vec<f32>,
}

/// Counts reported by `status`
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub collection: String,
    pub model: String,
    pub dimension: usize,
    pub passages: usize,
    pub by_source: BTreeMap<String, usize>,
}

pub struct VectorIndex {
    db: Arc<Database>,
    collection: String,
    model: String,
    dimension: usize,
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl VectorIndex {
    /// Open a collection, creating it on first use
    ///
    /// An existing collection built at a different dimension is refused with
    /// `SchemaMismatch`. A different model name at the same dimension is only
    /// logged.
    pub fn open(db: Arc<Database>, collection: &str, model: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RareGenError::InputInvalid(
                "Index dimension must be greater than 0".to_string(),
            ));
        }

        let conn = db.get_conn()?;
        let stored: Option<(String, i64)> = conn
            .query_row(
                "SELECT model, dimension FROM collections WHERE name = ?1",
                params![collection],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match stored {
            None => {
                conn.execute(
                    "INSERT INTO collections (name, model, dimension, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![collection, model, dimension as i64, chrono::Utc::now().to_rfc3339()],
                )?;
                info!(
                    "Created collection '{}' ({}, {}D)",
                    collection, model, dimension
                );
            }
            Some((_, stored_dim)) if stored_dim as usize != dimension => {
                return Err(RareGenError::SchemaMismatch {
                    collection: collection.to_string(),
                    expected: stored_dim as usize,
                    actual: dimension,
                });
            }
            Some((stored_model, _)) if stored_model != model => {
                warn!(
                    "Collection '{}' was built with '{}' but is being opened with '{}'; scores may be meaningless",
                    collection, stored_model, model
                );
            }
            Some(_) => {}
        }
        drop(conn);

        let index = Self {
            db,
            collection: collection.to_string(),
            model: model.to_string(),
            dimension,
            entries: RwLock::new(BTreeMap::new()),
        };
        index.load()?;

        Ok(index)
    }

    /// Open the database at `path` and then the collection inside it
    pub fn open_path(path: &Path, collection: &str, model: &str, dimension: usize) -> Result<Self> {
        let db = Arc::new(Database::new(path)?);
        Self::open(db, collection, model, dimension)
    }

    /// Drop a collection and everything in it, then open it fresh
    ///
    /// This is the only way to change a collection's model or dimension.
    pub fn rebuild(db: Arc<Database>, collection: &str, model: &str, dimension: usize) -> Result<Self> {
        let removed = db
            .get_conn()?
            .execute("DELETE FROM collections WHERE name = ?1", params![collection])?;
        if removed > 0 {
            info!("Dropped collection '{}' for rebuild", collection);
        }
        Self::open(db, collection, model, dimension)
    }

    fn load(&self) -> Result<()> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, text, source_tag, source_ref, position, vector
             FROM passages WHERE collection = ?1",
        )?;

        let rows = stmt.query_map(params![self.collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Vec<u8>>(5)?,
            ))
        })?;

        let mut loaded = BTreeMap::new();
        for row in rows {
            let (id, text, tag, source_ref, position, blob) =
                row.map_err(|e| RareGenError::IndexCorrupt(format!("Unreadable passage row: {}", e)))?;

            let vector = decode_vector(&blob, self.dimension).ok_or_else(|| {
                RareGenError::IndexCorrupt(format!(
                    "Passage {} has a {}-byte vector, expected {} floats",
                    id,
                    blob.len(),
                    self.dimension
                ))
            })?;
            let source_tag: SourceTag = tag.parse().map_err(|_| {
                RareGenError::IndexCorrupt(format!("Passage {} has unknown source tag '{}'", id, tag))
            })?;

            let passage = Passage {
                id: id.clone(),
                text,
                source_tag,
                source_ref,
                position: position.max(0) as usize,
            };
            loaded.insert(id, Entry { passage, vector });
        }

        debug!(
            "Loaded {} passages from collection '{}'",
            loaded.len(),
            self.collection
        );
        *self.write()? = loaded;
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Entry>>> {
        self.entries
            .read()
            .map_err(|_| RareGenError::IndexCorrupt("index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|_| RareGenError::IndexCorrupt("index lock poisoned".to_string()))
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(RareGenError::SchemaMismatch {
                collection: self.collection.clone(),
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    /// Insert or replace one passage
    pub fn upsert(&self, passage: &Passage, vector: &[f32]) -> Result<()> {
        self.upsert_batch(&[(passage.clone(), vector.to_vec())])?;
        Ok(())
    }

    /// Insert or replace a batch of passages in one transaction
    ///
    /// Upserting an id that is already present replaces it, so repeated
    /// ingestion of the same records leaves the index unchanged. Returns the
    /// number of items written.
    pub fn upsert_batch(&self, items: &[(Passage, Vec<f32>)]) -> Result<usize> {
        for (_, vector) in items {
            self.check_dimension(vector.len())?;
        }
        if items.is_empty() {
            return Ok(0);
        }

        let mut entries = self.write()?;
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        {
            let now = chrono::Utc::now().to_rfc3339();
            let mut stmt = tx.prepare_cached(
                "INSERT INTO passages (collection, id, text, source_tag, source_ref, position, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    text = excluded.text,
                    source_tag = excluded.source_tag,
                    source_ref = excluded.source_ref,
                    position = excluded.position,
                    vector = excluded.vector",
            )?;

            for (passage, vector) in items {
                stmt.execute(params![
                    self.collection,
                    passage.id,
                    passage.text,
                    passage.source_tag.as_str(),
                    passage.source_ref,
                    passage.position as i64,
                    encode_vector(vector),
                    now,
                ])?;
            }
        }
        tx.commit()?;

        for (passage, vector) in items {
            entries.insert(
                passage.id.clone(),
                Entry {
                    passage: passage.clone(),
                    vector: vector.clone(),
                },
            );
        }

        Ok(items.len())
    }

    /// The `k` passages closest to `query`, best first
    ///
    /// Scores are cosine similarities; equal scores are ordered by passage id.
    /// Returns fewer than `k` results when the index holds fewer passages.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Err(RareGenError::InputInvalid(
                "k must be at least 1".to_string(),
            ));
        }
        self.check_dimension(query.len())?;

        let entries = self.read()?;
        let mut scored: Vec<(&Entry, f32)> = entries
            .values()
            .map(|entry| (entry, cosine_similarity(query, &entry.vector)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.passage.id.cmp(&b.0.passage.id))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(entry, score)| RetrievalResult {
                passage: entry.passage.clone(),
                score,
            })
            .collect())
    }

    /// Make everything written so far durable in the main database file
    pub fn persist(&self) -> Result<()> {
        self.db.checkpoint()
    }

    /// Stored passage and vector for `id`
    pub fn get(&self, id: &str) -> Option<(Passage, Vec<f32>)> {
        self.read()
            .ok()?
            .get(id)
            .map(|e| (e.passage.clone(), e.vector.clone()))
    }

    pub fn len(&self) -> usize {
        self.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let entries = self.read()?;
        let mut by_source = BTreeMap::new();
        for entry in entries.values() {
            *by_source
                .entry(entry.passage.source_tag.as_str().to_string())
                .or_insert(0) += 1;
        }

        Ok(IndexStats {
            collection: self.collection.clone(),
            model: self.model.clone(),
            dimension: self.dimension,
            passages: entries.len(),
            by_source,
        })
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8], dimension: usize) -> Option<Vec<f32>> {
    if bytes.len() != dimension * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
