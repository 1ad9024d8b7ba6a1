//! Index and account statistics for `ragchat stats`.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::index::read_meta;
use crate::migrate;
use crate::sqlite_store::{SqliteAccounts, SqliteConversations};

pub async fn run_stats(config: &Config) -> Result<()> {
    let index_pool = db::connect(&config.index.path).await?;
    migrate::migrate_index(&index_pool).await?;

    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&index_pool)
        .await?;
    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&index_pool)
        .await?;
    let meta = read_meta(&index_pool).await?;

    let per_source = sqlx::query(
        "SELECT source, COUNT(*) AS n FROM chunks GROUP BY source ORDER BY source",
    )
    .fetch_all(&index_pool)
    .await?;
    index_pool.close().await;

    let app_pool = db::connect(&config.db.path).await?;
    migrate::migrate_app(&app_pool).await?;
    let users = SqliteAccounts::new(app_pool.clone(), 0).count().await?;
    let conversations = SqliteConversations::new(app_pool.clone(), 0).count().await?;
    app_pool.close().await;

    println!("RAG Chat Stats");
    println!("==============");
    println!();
    println!("  Index:         {}", config.index.path.display());
    println!("  Size:          {}", format_bytes(file_size(&config.index.path)));
    match meta {
        Some(meta) => println!(
            "  Model:         {} ({} dims, built {})",
            meta.model,
            meta.dims,
            format_ts(meta.built_at)
        ),
        None => println!("  Model:         (never built)"),
    }
    println!("  Chunks:        {}", chunks);
    println!("  Vectors:       {}", vectors);

    if !per_source.is_empty() {
        println!();
        println!("  {:<32} {:>8}", "SOURCE", "CHUNKS");
        for row in &per_source {
            let source: String = row.get("source");
            let n: i64 = row.get("n");
            println!("  {:<32} {:>8}", source, n);
        }
    }

    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Accounts:      {}", users);
    println!("  Conversations: {}", conversations);
    Ok(())
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
