//! Schema creation and metadata validation.
//!
//! All statements are idempotent; running them against an existing index is
//! a no-op apart from the metadata check.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::error::MemoryError;

pub const SCHEMA_VERSION: &str = "1";

pub async fn run_migrations(pool: &SqlitePool, model: &str, dims: usize) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            namespace TEXT NOT NULL,
            agent TEXT,
            mtime REAL NOT NULL,
            hash TEXT NOT NULL,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            heading TEXT,
            token_count INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(file_id, chunk_index),
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // No foreign key: rows are removed explicitly before their chunk.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id INTEGER PRIMARY KEY,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                text,
                heading,
                tokenize = 'porter unicode61'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_namespace ON files(namespace)")
        .execute(pool)
        .await?;

    for (key, value) in [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("embedding_model", model.to_string()),
        ("embedding_dim", dims.to_string()),
    ] {
        sqlx::query("INSERT OR IGNORE INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }

    check_meta(pool, model, dims).await
}

pub async fn read_meta(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

async fn check_meta(pool: &SqlitePool, model: &str, dims: usize) -> Result<()> {
    if let Some(stored) = read_meta(pool, "schema_version").await? {
        if stored != SCHEMA_VERSION {
            return Err(MemoryError::SchemaVersionMismatch {
                stored,
                expected: SCHEMA_VERSION.to_string(),
            }
            .into());
        }
    }

    if let Some(stored) = read_meta(pool, "embedding_dim").await? {
        let stored_dims: usize = stored.parse().map_err(|_| {
            MemoryError::InvalidConfig(format!("stored embedding_dim is not a number: {}", stored))
        })?;
        if stored_dims != dims {
            return Err(MemoryError::DimensionMismatch {
                expected: stored_dims,
                actual: dims,
            }
            .into());
        }
    }

    if let Some(stored) = read_meta(pool, "embedding_model").await? {
        if stored != model {
            tracing::warn!(
                stored = %stored,
                configured = %model,
                "index was built with a different embedding model; run `reset --confirm` and re-sync"
            );
        }
    }

    Ok(())
}
