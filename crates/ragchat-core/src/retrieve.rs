//! Context retrieval.
//!
//! Turns a free-text query into the "context" block of a prompt: one
//! similarity query against the [`Index`], chunk texts joined with `\n` in
//! the order the index returned them. No re-ranking, no deduplication and
//! no relevance threshold are applied.

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::Chunk;
use crate::store::Index;

/// Default number of chunks requested per query.
pub const DEFAULT_TOP_K: usize = 4;

/// Validate and normalize a query. Whitespace-only input is rejected.
pub fn clean_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidQuery("query must not be empty".to_string()));
    }
    Ok(trimmed)
}

/// Fetch the chunks for `query` without joining them.
pub async fn retrieve_chunks(query: &str, index: &dyn Index, k: usize) -> Result<Vec<Chunk>> {
    let query = clean_query(query)?;
    let chunks = index.query(query, k).await?;
    debug!(k, returned = chunks.len(), "retrieved chunks");
    Ok(chunks)
}

/// Retrieve context text for `query`.
///
/// Returns an empty string when nothing matches.
pub async fn retrieve(query: &str, index: &dyn Index, k: usize) -> Result<String> {
    let chunks = retrieve_chunks(query, index, k).await?;
    Ok(join_context(&chunks))
}

/// Join chunk texts with newlines, preserving order.
pub fn join_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
