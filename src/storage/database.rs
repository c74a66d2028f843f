//! SQLite database management with migrations
//!
//! Holds collections and their embedded passages

use crate::error::{RareGenError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the knowledge database at `db_path`
    ///
    /// A file that exists but is not a readable SQLite database is reported
    /// as `IndexCorrupt`.
    pub fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RareGenError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        probe(db_path)?;

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| RareGenError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| RareGenError::Config(format!("Failed to get connection: {}", e)))?;

            // WAL lets queries run while the ingest writer commits
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )
            .map_err(|e| corrupt(db_path, e))?;
        }

        let db = Self {
            pool,
            path: db_path.to_path_buf(),
        };

        db.migrate().map_err(|e| match e {
            RareGenError::Database(e) => corrupt(db_path, e),
            other => other,
        })?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| RareGenError::Config(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Flush the write-ahead log into the main database file
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    /// Model and dimension a collection was created with, if it exists
    pub fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let conn = self.get_conn()?;
        let info = conn
            .query_row(
                "SELECT model, dimension, created_at FROM collections WHERE name = ?1",
                params![name],
                |row| {
                    Ok(CollectionInfo {
                        name: name.to_string(),
                        model: row.get(0)?,
                        dimension: row.get::<_, i64>(1)? as usize,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let collection_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM collections", [], |row| row.get(0))?;

        let passage_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM passages", [], |row| row.get(0))?;

        let file_size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);

        Ok(DbStats {
            collection_count: collection_count as usize,
            passage_count: passage_count as usize,
            file_size_bytes: file_size,
        })
    }
}

/// Registration row of a collection
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub model: String,
    pub dimension: usize,
    pub created_at: String,
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub collection_count: usize,
    pub passage_count: usize,
    pub file_size_bytes: u64,
}

/// Touch the schema once with a plain connection so an unreadable file fails
/// fast instead of inside the pool builder
fn probe(db_path: &Path) -> Result<()> {
    let conn = Connection::open(db_path).map_err(|e| corrupt(db_path, e))?;
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(|e| corrupt(db_path, e))?;
    Ok(())
}

fn corrupt(db_path: &Path, e: rusqlite::Error) -> RareGenError {
    RareGenError::IndexCorrupt(format!("{}: {}", db_path.display(), e))
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- One row per named index; pins the embedding model and dimension
    CREATE TABLE collections (
        name TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        dimension INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );

    -- Embedded passages, vector stored as little-endian f32
    CREATE TABLE passages (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        text TEXT NOT NULL,
        source_tag TEXT NOT NULL,
        source_ref TEXT NOT NULL,
        position INTEGER NOT NULL,
        vector BLOB NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (collection, id),
        FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
    );

    CREATE INDEX idx_passages_source ON passages(collection, source_tag);
    "#,
];
