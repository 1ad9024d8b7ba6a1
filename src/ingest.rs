//! Document ingestion: directory → chunks → embeddings → persisted index.
//!
//! The build is all-or-nothing. Every batch is embedded before anything is
//! written, and the index tables are replaced in one transaction, so a
//! failed run leaves the previous index intact.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use ragchat_core::chunk::{chunk_text, estimate_chunks, ChunkParams};
use ragchat_core::embedding::Embedder;
use ragchat_core::models::Chunk;
use ragchat_core::Error;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::index;
use crate::migrate;

/// A text file read from the input directory.
#[derive(Debug, Clone)]
pub struct SourceDoc {
    /// File name relative to the input directory.
    pub name: String,
    pub text: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
    pub embedded: usize,
}

/// `ragchat index` entry point.
pub async fn run_index(config: &Config, dir: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.ingest.directory.clone());
    let params = config.ingest.chunk_params()?;
    let docs = read_documents(&dir, &config.ingest.include_globs)?;

    if dry_run {
        let estimated: usize = docs.iter().map(|d| estimate_chunks(&d.text, &params)).sum();
        println!("index {} (dry-run)", dir.display());
        println!("  files found: {}", docs.len());
        println!("  chunks: {}", estimated);
        return Ok(());
    }

    let embedder = create_embedder(&config.embedding)?;
    let pool = db::connect(&config.index.path).await?;
    migrate::migrate_index(&pool).await?;

    let report = build_index(
        &pool,
        &docs,
        &params,
        embedder.as_ref(),
        config.embedding.batch_size,
    )
    .await?;
    pool.close().await;

    println!("index {}", dir.display());
    println!("  files: {}", report.files);
    println!("  chunks: {}", report.chunks);
    println!("  embeddings written: {}", report.embedded);
    println!("  index: {}", config.index.path.display());
    Ok(())
}

/// Read every matching text file directly under `dir`, sorted by name.
///
/// A missing directory is created and reported as [`Error::NoInput`], as is
/// a path that is not a directory or a directory with no matching files.
/// A matching file that cannot be read as UTF-8 fails the whole run.
pub fn read_documents(dir: &Path, include_globs: &[String]) -> Result<Vec<SourceDoc>> {
    if dir.exists() && !dir.is_dir() {
        return Err(Error::NoInput(format!("{} is not a directory", dir.display())).into());
    }
    if !dir.is_dir() {
        std::fs::create_dir_all(dir)?;
        return Err(Error::NoInput(format!(
            "created {}; add text files to it and run `ragchat index` again",
            dir.display()
        ))
        .into());
    }

    let include = build_globset(include_globs)?;
    let mut docs = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !include.is_match(&name) {
            continue;
        }

        let text = std::fs::read_to_string(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        docs.push(SourceDoc { name, text });
    }

    if docs.iter().all(|d| d.text.is_empty()) {
        return Err(Error::NoInput(format!(
            "no text documents matching {:?} in {}",
            include_globs,
            dir.display()
        ))
        .into());
    }

    Ok(docs)
}

/// Chunk `docs` in order.
pub fn chunk_documents(docs: &[SourceDoc], params: &ChunkParams) -> Vec<Chunk> {
    docs.iter()
        .flat_map(|doc| chunk_text(&doc.name, &doc.text, params))
        .collect()
}

/// Chunk, embed and persist `docs`, replacing the current index.
pub async fn build_index(
    pool: &SqlitePool,
    docs: &[SourceDoc],
    params: &ChunkParams,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<IngestReport> {
    let chunks = chunk_documents(docs, params);
    if chunks.is_empty() {
        return Err(Error::NoInput("documents produced no chunks".to_string()).into());
    }

    let mut entries = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            ))
            .into());
        }
        entries.extend(batch.iter().cloned().zip(vectors));
    }

    index::replace_all(pool, &entries, embedder.model_name(), embedder.dims()).await?;
    info!(
        files = docs.len(),
        chunks = entries.len(),
        model = embedder.model_name(),
        "index built"
    );

    Ok(IngestReport {
        files: docs.len(),
        chunks: chunks.len(),
        embedded: entries.len(),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn txt() -> Vec<String> {
        vec!["*.txt".to_string()]
    }

    /// Constant vectors; counts calls and can fail on a given batch.
    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> ragchat_core::Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_on_call {
                return Err(Error::Embedding("quota exceeded".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn index_pool(tmp: &TempDir) -> SqlitePool {
        let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
        migrate::migrate_index(&pool).await.unwrap();
        pool
    }

    async fn chunk_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn test_missing_directory_is_created_and_reported() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("data");
        let err = read_documents(&dir, &txt()).unwrap_err();
        let core = err.downcast_ref::<Error>().unwrap();
        assert_eq!(core.code(), "no_input");
        assert!(dir.is_dir());
    }

    #[test]
    fn test_empty_directory_is_no_input() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("notes.md"), "not a txt file").unwrap();
        let err = read_documents(tmp.path(), &txt()).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>().unwrap().code(), "no_input");
    }

    #[test]
    fn test_reads_only_top_level_matches_sorted() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.txt"), "bee").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "ay").unwrap();
        std::fs::write(tmp.path().join("c.md"), "sea").unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested/d.txt"), "dee").unwrap();

        let docs = read_documents(tmp.path(), &txt()).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_non_utf8_file_fails_the_run() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("good.txt"), "x".repeat(2500)).unwrap();
        let latin1: Vec<u8> = b"caf\xe9 ".repeat(500);
        std::fs::write(tmp.path().join("latin1.txt"), latin1).unwrap();

        let err = read_documents(tmp.path(), &txt()).unwrap_err();
        assert!(err.to_string().contains("latin1.txt"));
    }

    #[test]
    fn test_file_in_place_of_directory_is_no_input() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");
        std::fs::write(&path, "not a directory").unwrap();

        let err = read_documents(&path, &txt()).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>().unwrap().code(), "no_input");
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_build_index_batches_and_persists() {
        let tmp = TempDir::new().unwrap();
        let pool = index_pool(&tmp).await;
        let docs = vec![SourceDoc {
            name: "long.txt".to_string(),
            text: "x".repeat(2500),
        }];
        let params = ChunkParams::new(1000, 200).unwrap();
        let embedder = CountingEmbedder::default();

        let report = build_index(&pool, &docs, &params, &embedder, 3).await.unwrap();
        assert_eq!(report.chunks, 4);
        assert_eq!(report.embedded, 4);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(chunk_count(&pool).await, 4);
    }

    #[tokio::test]
    async fn test_unreadable_file_keeps_previous_index() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir(&data).unwrap();
        std::fs::write(data.join("one.txt"), "original content").unwrap();

        let mut config = Config::minimal();
        config.index.path = tmp.path().join("index.sqlite");
        config.embedding.provider = "disabled".to_string();

        let pool = index_pool(&tmp).await;
        let docs = read_documents(&data, &txt()).unwrap();
        let params = ChunkParams::new(100, 20).unwrap();
        build_index(&pool, &docs, &params, &CountingEmbedder::default(), 8)
            .await
            .unwrap();

        std::fs::write(data.join("two.txt"), [0xff, 0xfe, 0x00]).unwrap();
        let err = run_index(&config, Some(data.clone()), false).await.unwrap_err();
        assert!(err.to_string().contains("two.txt"));

        let sources: Vec<String> = sqlx::query_scalar("SELECT source FROM chunks")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(sources, vec!["one.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_embedding_keeps_previous_index() {
        let tmp = TempDir::new().unwrap();
        let pool = index_pool(&tmp).await;
        let params = ChunkParams::new(100, 20).unwrap();
        let first = vec![SourceDoc {
            name: "one.txt".to_string(),
            text: "original content".to_string(),
        }];
        build_index(&pool, &first, &params, &CountingEmbedder::default(), 8)
            .await
            .unwrap();

        let second = vec![SourceDoc {
            name: "two.txt".to_string(),
            text: "y".repeat(500),
        }];
        let failing = CountingEmbedder {
            fail_on_call: Some(1),
            ..Default::default()
        };
        let err = build_index(&pool, &second, &params, &failing, 2).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));

        let source: String = sqlx::query_scalar("SELECT source FROM chunks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(source, "one.txt");
        assert_eq!(chunk_count(&pool).await, 1);
    }
}
