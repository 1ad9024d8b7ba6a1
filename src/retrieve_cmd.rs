//! `ragchat retrieve`: print the context a query would be given.

use anyhow::Result;

use ragchat_core::retrieve::{clean_query, join_context, retrieve_chunks};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::index::SqliteIndex;
use crate::migrate;

pub async fn run_retrieve(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    // Reject blank input before touching the index or the embedding API.
    let query = clean_query(query)?;
    let k = k.unwrap_or(config.index.top_k);

    let pool = db::connect(&config.index.path).await?;
    migrate::migrate_index(&pool).await?;
    let embedder = create_embedder(&config.embedding)?;
    let index = SqliteIndex::open(pool, embedder).await?;

    let chunks = retrieve_chunks(query, &index, k).await?;
    if chunks.is_empty() {
        println!("No matching context.");
        return Ok(());
    }

    for chunk in &chunks {
        tracing::debug!(id = %chunk.id, chars = chunk.text.chars().count(), "context chunk");
    }
    println!("{}", join_context(&chunks));
    Ok(())
}
