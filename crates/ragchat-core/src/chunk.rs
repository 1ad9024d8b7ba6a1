//! Fixed-size, overlapping character chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters.
//! Consecutive chunks share `chunk_overlap` characters so that a passage cut
//! by a boundary still appears whole in one of its neighbours. Boundaries do
//! not try to respect sentences or paragraphs.
//!
//! # Algorithm
//!
//! 1. Let `stride = chunk_size − chunk_overlap`.
//! 2. Cut the text into fresh segments of `stride` characters:
//!    `[0, stride)`, `[stride, 2·stride)`, …
//! 3. Chunk `k` is segment `k` prefixed by the last `chunk_overlap`
//!    characters before it (chunk 0 has no prefix).
//!
//! A document of `n` characters yields `ceil(n / stride)` chunks. Lengths
//! are counted in `char`s, never bytes, so multi-byte text is never split
//! inside a code point.
//!
//! # Example
//!
//! ```rust
//! use ragchat_core::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams::new(1000, 200).unwrap();
//! let text = "x".repeat(2500);
//! let chunks = chunk_text("notes.txt", &text, &params);
//! assert_eq!(chunks.len(), 4);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Chunk size and overlap, validated so that `overlap < size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkParams {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be > 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Fresh characters contributed by each chunk.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Split `text` into overlapping chunks tagged with `source`.
///
/// Returns an empty vector for empty text. Chunk indices are contiguous
/// from 0 and `offset` is the character offset of each chunk's start.
pub fn chunk_text(source: &str, text: &str, params: &ChunkParams) -> Vec<Chunk> {
    // Byte offset of every char start, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;
    if n_chars == 0 {
        return Vec::new();
    }

    let stride = params.stride();
    let count = n_chars.div_ceil(stride);
    let mut chunks = Vec::with_capacity(count);

    for k in 0..count {
        let fresh_start = k * stride;
        let fresh_end = (fresh_start + stride).min(n_chars);
        let start = fresh_start.saturating_sub(params.chunk_overlap);
        let piece = &text[bounds[start]..bounds[fresh_end]];
        chunks.push(make_chunk(source, k as i64, start, piece));
    }

    chunks
}

/// Number of chunks [`chunk_text`] would produce, without allocating them.
pub fn estimate_chunks(text: &str, params: &ChunkParams) -> usize {
    text.chars().count().div_ceil(params.stride())
}

fn make_chunk(source: &str, index: i64, offset: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}:{}", source, offset),
        source: source.to_string(),
        offset,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
