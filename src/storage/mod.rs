//! Storage layer for RareGen
//!
//! SQLite-backed collections of embedded passages

pub mod database;
mod index;

pub use database::{CollectionInfo, Database, DbPool, DbStats};
pub use index::{IndexHandle, IndexStats, VectorIndex};
