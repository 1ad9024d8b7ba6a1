//! The persisted vector index.
//!
//! Chunks and their embeddings live in a separate SQLite file
//! (`index.path`). Queries embed the question once and rank every stored
//! vector by cosine similarity in Rust; the corpus is a directory of text
//! files, so a linear scan is adequate.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use ragchat_core::embedding::{blob_to_vec, cosine_similarity, embed_one, vec_to_blob, Embedder};
use ragchat_core::error::PersistenceError;
use ragchat_core::models::Chunk;
use ragchat_core::store::Index;
use ragchat_core::{Error, Result};

/// Model and dimensionality recorded by the last successful build.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub model: String,
    pub dims: usize,
    pub built_at: i64,
}

fn storage(e: sqlx::Error) -> Error {
    Error::Persistence(PersistenceError::Storage(e.to_string()))
}

pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        Self { pool, embedder }
    }

    /// Open and warn when the stored vectors came from a different model.
    pub async fn open(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if let Some(meta) = read_meta(&pool).await? {
            if meta.model != embedder.model_name() || meta.dims != embedder.dims() {
                warn!(
                    stored_model = %meta.model,
                    stored_dims = meta.dims,
                    model = embedder.model_name(),
                    dims = embedder.dims(),
                    "index was built with a different embedding model; rebuild with `ragchat index`"
                );
            }
        }
        Ok(Self::new(pool, embedder))
    }

    pub async fn is_empty(&self) -> Result<bool> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(n == 0)
    }

    /// Rank stored chunks against an already-embedded query.
    ///
    /// Ties keep insertion order (source, then chunk index).
    pub async fn query_vector(&self, query_vec: &[f32], k: usize) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source, c.char_offset, c.chunk_index, c.text, c.hash, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            ORDER BY c.source, c.chunk_index
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut scored: Vec<(f32, Chunk)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob));
                let offset: i64 = row.get("char_offset");
                let chunk = Chunk {
                    id: row.get("id"),
                    source: row.get("source"),
                    offset: offset.max(0) as usize,
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    hash: row.get("hash"),
                };
                (similarity, chunk)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, chunk)| chunk).collect())
    }
}

#[async_trait]
impl Index for SqliteIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Chunk>> {
        if k == 0 || self.is_empty().await? {
            return Ok(Vec::new());
        }
        let query_vec = embed_one(self.embedder.as_ref(), text).await?;
        let chunks = self.query_vector(&query_vec, k).await?;
        debug!(k, returned = chunks.len(), "index query");
        Ok(chunks)
    }
}

pub async fn read_meta(pool: &SqlitePool) -> Result<Option<IndexMeta>> {
    let row = sqlx::query("SELECT model, dims, built_at FROM index_meta WHERE id = 1")
        .fetch_optional(pool)
        .await
        .map_err(storage)?;

    Ok(row.map(|r| {
        let dims: i64 = r.get("dims");
        IndexMeta {
            model: r.get("model"),
            dims: dims.max(0) as usize,
            built_at: r.get("built_at"),
        }
    }))
}

/// Replace the whole index in one transaction.
///
/// Readers see either the previous index or the new one, never a mix.
pub async fn replace_all(
    pool: &SqlitePool,
    entries: &[(Chunk, Vec<f32>)],
    model: &str,
    dims: usize,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;

    for (chunk, vector) in entries {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, source, char_offset, chunk_index, text, hash)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(chunk.offset as i64)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO index_meta (id, model, dims, built_at) VALUES (1, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            built_at = excluded.built_at
        "#,
    )
    .bind(model)
    .bind(dims as i64)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use ragchat_core::chunk::{chunk_text, ChunkParams};
    use tempfile::TempDir;

    /// Maps each text to a fixed axis by keyword, so ranking is predictable.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }

        fn dims(&self) -> usize {
            3
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.contains("harmony") as u8 as f32,
                        t.contains("anger") as u8 as f32,
                        0.1,
                    ]
                })
                .collect())
        }
    }

    async fn built_index(tmp: &TempDir) -> SqliteIndex {
        let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
        migrate::migrate_index(&pool).await.unwrap();

        let params = ChunkParams::new(100, 10).unwrap();
        let mut chunks = chunk_text("nine.txt", "Type Nine seeks harmony.", &params);
        chunks.extend(chunk_text("one.txt", "Type One suppresses anger.", &params));
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = KeywordEmbedder.embed(&texts).await.unwrap();
        let entries: Vec<(Chunk, Vec<f32>)> = chunks.into_iter().zip(vectors).collect();
        replace_all(&pool, &entries, "keyword", 3).await.unwrap();

        SqliteIndex::open(pool, Arc::new(KeywordEmbedder)).await.unwrap()
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let tmp = TempDir::new().unwrap();
        let index = built_index(&tmp).await;

        let top = index.query("what about anger?", 1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].source, "one.txt");

        let all = index.query("harmony please", 4).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source, "nine.txt");
    }

    #[tokio::test]
    async fn test_meta_recorded() {
        let tmp = TempDir::new().unwrap();
        let index = built_index(&tmp).await;
        let meta = read_meta(&index.pool).await.unwrap().unwrap();
        assert_eq!(meta.model, "keyword");
        assert_eq!(meta.dims, 3);
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
        migrate::migrate_index(&pool).await.unwrap();
        let index = SqliteIndex::new(pool, Arc::new(crate::embedding::DisabledEmbedder));

        // No vectors stored, so the (disabled) embedder is never called.
        assert!(index.query("anything", 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_swaps_contents() {
        let tmp = TempDir::new().unwrap();
        let index = built_index(&tmp).await;

        let params = ChunkParams::new(100, 10).unwrap();
        let chunks = chunk_text("new.txt", "Only anger now.", &params);
        let entries = vec![(chunks[0].clone(), vec![0.0, 1.0, 0.1])];
        replace_all(&index.pool, &entries, "keyword", 3).await.unwrap();

        let all = index.query("anger", 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source, "new.txt");
    }
}
