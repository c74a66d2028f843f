//! Text normalization and passage splitting
//!
//! Raw records arrive with markup, control characters and ragged whitespace.
//! The chunker cleans them and cuts them into bounded passages whose ids are
//! a pure function of (source, position), so re-ingesting the same corpus
//! yields exactly the same passage ids.

use crate::config::ChunkingConfig;
use crate::passage::{passage_id, Passage};
use crate::source::RawRecord;
use regex::Regex;
use std::sync::OnceLock;

fn markup_pattern() -> &'static Regex {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    MARKUP.get_or_init(|| {
        Regex::new(r"(?s)<[^<>]{1,200}>|&(?:[a-zA-Z]{2,8}|#[0-9]{1,6});")
            .expect("markup pattern is valid")
    })
}

/// Strip markup and non-printable noise, collapse whitespace
///
/// Applied both to documents at ingestion time and to query text at
/// retrieval time so the two embedding spaces stay comparable.
pub fn clean_text(raw: &str) -> String {
    let without_markup = markup_pattern().replace_all(raw, " ");

    let mut out = String::with_capacity(without_markup.len());
    let mut pending_space = false;
    for c in without_markup.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_control() || is_invisible(c) {
            continue;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    out
}

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200F}' | '\u{FEFF}' | '\u{00AD}')
}

/// Splits cleaned records into bounded, overlapping passages
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        let max_chars = config.max_chars.max(1);
        Self {
            max_chars,
            overlap: config.overlap.min(max_chars - 1),
        }
    }

    /// Normalize one raw record into zero or more passages
    ///
    /// Records that are empty after cleaning yield no passages.
    pub fn normalize(&self, record: &RawRecord) -> Vec<Passage> {
        let cleaned = clean_text(&record.text);

        self.split(&cleaned)
            .into_iter()
            .enumerate()
            .map(|(position, text)| Passage {
                id: passage_id(record.tag, &record.source_ref, position),
                text,
                source_tag: record.tag,
                source_ref: record.source_ref.clone(),
                position,
            })
            .collect()
    }

    /// Normalize a batch of records, dropping duplicate passage ids
    pub fn normalize_all(&self, records: &[RawRecord]) -> Vec<Passage> {
        let mut seen = std::collections::HashSet::new();
        records
            .iter()
            .flat_map(|record| self.normalize(record))
            .filter(|passage| seen.insert(passage.id.clone()))
            .collect()
    }

    /// Cut text into windows of at most `max_chars`, preferring whitespace breaks
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() <= self.max_chars {
            return vec![text.to_string()];
        }

        let mut pieces = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let mut end = (start + self.max_chars).min(chars.len());

            if end < chars.len() {
                // Back off to the last space if it keeps at least half a window
                if let Some(ws) = chars[start..end].iter().rposition(|c| c.is_whitespace()) {
                    if ws > self.max_chars / 2 {
                        end = start + ws;
                    }
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }

            if end >= chars.len() {
                break;
            }

            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }

        pieces
    }
}
