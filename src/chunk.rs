//! Deterministic character-window chunker.
//!
//! Splits document text into fixed-size character windows with a configurable
//! overlap. Identical input and parameters produce byte-identical chunks
//! across runs and across processes; chunk IDs are `{document_id}:{index}`
//! with indices starting at 0.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{DEFAULT_CHUNK_OVERLAP_CHARS, DEFAULT_CHUNK_SIZE_CHARS};
use crate::error::LexError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingOptions {
    /// Target chunk size in characters.
    #[serde(default = "default_size")]
    pub chunk_size_chars: usize,
    /// Overlap between consecutive chunks: the literal last N characters of
    /// the previous chunk.
    #[serde(default = "default_overlap")]
    pub chunk_overlap_chars: usize,
    /// Optional cap to prevent runaway chunking.
    #[serde(default)]
    pub max_chunks_per_document: Option<usize>,
}

fn default_size() -> usize {
    DEFAULT_CHUNK_SIZE_CHARS
}

fn default_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP_CHARS
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size_chars: DEFAULT_CHUNK_SIZE_CHARS,
            chunk_overlap_chars: DEFAULT_CHUNK_OVERLAP_CHARS,
            max_chunks_per_document: None,
        }
    }
}

impl ChunkingOptions {
    pub fn validate(&self) -> Result<(), LexError> {
        if self.chunk_size_chars == 0 {
            return Err(LexError::invalid_input("chunk_size_chars must be >= 1"));
        }
        if self.chunk_overlap_chars >= self.chunk_size_chars {
            return Err(LexError::invalid_input(
                "chunk_overlap_chars must be smaller than chunk_size_chars",
            ));
        }
        if self.max_chunks_per_document == Some(0) {
            return Err(LexError::invalid_input(
                "max_chunks_per_document must be >= 1 when set",
            ));
        }
        Ok(())
    }
}

/// Split text into deterministic overlapping character windows.
///
/// The input is trimmed once; windows are then exact character slices —
/// no per-chunk trimming, so the overlap really is the literal tail of the
/// previous chunk. Documents shorter than the chunk size produce exactly
/// one chunk. Whitespace-only documents are rejected.
pub fn chunk_text(text: &str, options: &ChunkingOptions) -> Result<Vec<String>, LexError> {
    options.validate()?;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LexError::invalid_input("document text is empty"));
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let step = options.chunk_size_chars - options.chunk_overlap_chars;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + options.chunk_size_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect::<String>());

        if end >= chars.len() {
            break;
        }
        if let Some(cap) = options.max_chunks_per_document {
            if chunks.len() >= cap {
                break;
            }
        }
        start += step;
    }

    Ok(chunks)
}

/// SHA-256 hex digest of chunk content, for determinism checks and
/// embedding staleness detection.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
