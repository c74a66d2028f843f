//! Passage records stored in the knowledge base

use crate::error::{RareGenError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a passage's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    PubMed,
    Guideline,
    Other,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::PubMed => "pubmed",
            SourceTag::Guideline => "guideline",
            SourceTag::Other => "other",
        }
    }

    /// Human-facing label used in prompts and evidence listings
    pub fn label(&self) -> &'static str {
        match self {
            SourceTag::PubMed => "PubMed",
            SourceTag::Guideline => "Clinical Guideline",
            SourceTag::Other => "Other",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = RareGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pubmed" => Ok(SourceTag::PubMed),
            "guideline" | "guidelines" => Ok(SourceTag::Guideline),
            "other" => Ok(SourceTag::Other),
            _ => Err(RareGenError::InputInvalid(format!(
                "Unknown source tag: {}",
                s
            ))),
        }
    }
}

/// An atomic unit of retrievable text
///
/// `id` is derived from (`source_tag`, `source_ref`, `position`), so the same
/// input always maps to the same id. Text never changes once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Stable identifier (32 hex chars)
    pub id: String,
    /// Normalized passage text
    pub text: String,
    /// Origin of the text
    pub source_tag: SourceTag,
    /// Identifier of the parent record (PMID, corpus row id, ...)
    pub source_ref: String,
    /// Position of this passage within its parent record
    pub position: usize,
}

impl Passage {
    /// Short preview of the text, cut on a char boundary
    pub fn preview(&self, max_chars: usize) -> String {
        preview(&self.text, max_chars)
    }
}

/// Derive the stable passage id for a (source, position) pair
pub fn passage_id(source_tag: SourceTag, source_ref: &str, position: usize) -> String {
    let key = format!("{}:{}:{}", source_tag.as_str(), source_ref, position);
    let hash = blake3::hash(key.as_bytes());
    hash.to_hex()[..32].to_string()
}

/// Truncate `text` to `max_chars` characters, appending "..." when cut
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
