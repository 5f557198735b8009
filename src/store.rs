//! The persistent index.
//!
//! [`MemoryStore`] owns every table. Chunks have two mirrors, a vector row
//! in `chunk_vectors` and a lexical row in `chunks_fts` (`rowid = chunk id`),
//! and both are written and deleted here in the same transaction as the
//! chunk itself. Deleting a file removes vectors first, then lexical rows,
//! then the file row; chunks follow through `ON DELETE CASCADE`.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;

use crate::db;
use crate::embedding::{blob_to_vec, l2_distance, vec_to_blob};
use crate::error::MemoryError;
use crate::migrate;
use crate::models::{ChunkWithFile, DiscoveredFile, FileRecord, MarkdownChunk};

#[derive(Debug, sqlx::FromRow)]
struct StoredMtime {
    path: String,
    mtime: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct StoredVector {
    chunk_id: i64,
    embedding: Vec<u8>,
}

#[derive(Debug, sqlx::FromRow)]
struct FtsHit {
    chunk_id: i64,
    rank: f64,
}

/// A vector-path hit: chunk id and L2 distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: i64,
    pub distance: f64,
}

/// A lexical-path hit: chunk id and raw FTS5 rank (lower is better).
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub chunk_id: i64,
    pub rank: f64,
}

/// Row counts of every table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub files: i64,
    pub chunks: i64,
    pub vectors: i64,
    pub fts_rows: i64,
}

pub struct MemoryStore {
    pool: SqlitePool,
    dims: usize,
}

impl MemoryStore {
    /// Open or create the index and validate its metadata against the
    /// running embedding configuration.
    pub async fn open(db_path: &Path, model: &str, dims: usize) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool, model, dims)
            .await
            .with_context(|| format!("Failed to initialize index: {}", db_path.display()))?;
        Ok(Self { pool, dims })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, path, namespace, agent, mtime, hash, chunk_count, indexed_at
            FROM files
            ORDER BY path
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn file_mtimes(&self) -> Result<HashMap<String, f64>> {
        let rows = sqlx::query_as::<_, StoredMtime>("SELECT path, mtime FROM files")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| (r.path, r.mtime)).collect())
    }

    /// Write `file` and its chunks, replacing any prior record for the same
    /// path. `vectors[i]` is the embedding of `chunks[i]`. One transaction.
    pub async fn replace_file(
        &self,
        file: &DiscoveredFile,
        hash: &str,
        chunks: &[MarkdownChunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "{} chunks but {} vectors for {}",
                chunks.len(),
                vectors.len(),
                file.rel_path
            );
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            }
            .into());
        }

        let mut tx = self.pool.begin().await?;

        delete_file_rows(&mut tx, &file.rel_path).await?;

        let now = chrono::Utc::now().timestamp();
        let file_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO files (path, namespace, agent, mtime, hash, chunk_count, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&file.rel_path)
        .bind(file.namespace)
        .bind(&file.agent)
        .bind(file.mtime)
        .bind(hash)
        .bind(chunks.len() as i64)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for (index, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
            let blob = vec_to_blob(vector);
            let chunk_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO chunks (file_id, chunk_index, text, start_line, end_line, heading, token_count, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(file_id)
            .bind(index as i64)
            .bind(&chunk.text)
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(&chunk.heading)
            .bind(chunk.token_count as i64)
            .bind(&blob)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
                .bind(chunk_id)
                .bind(&blob)
                .execute(&mut *tx)
                .await?;

            sqlx::query("INSERT INTO chunks_fts (rowid, text, heading) VALUES (?, ?, ?)")
                .bind(chunk_id)
                .bind(&chunk.text)
                .bind(chunk.heading.as_deref().unwrap_or(""))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record a new mtime for a file whose content did not change.
    pub async fn touch_file(&self, path: &str, mtime: f64) -> Result<()> {
        sqlx::query("UPDATE files SET mtime = ? WHERE path = ?")
            .bind(mtime)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a file, its chunks and both mirrors. One transaction.
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_file_rows(&mut tx, path).await?;
        tx.commit().await?;
        Ok(())
    }

    /// The `k` chunks nearest to `query` by Euclidean distance, closest first.
    pub async fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if query.len() != self.dims {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            }
            .into());
        }

        let rows = sqlx::query_as::<_, StoredVector>(
            "SELECT chunk_id, embedding FROM chunk_vectors ORDER BY chunk_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| VectorHit {
                chunk_id: row.chunk_id,
                distance: l2_distance(query, &blob_to_vec(&row.embedding)) as f64,
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Run an FTS5 `MATCH` expression, best rank first.
    pub async fn keyword_search(&self, fts_query: &str, k: usize) -> Result<Vec<KeywordHit>> {
        let rows = sqlx::query_as::<_, FtsHit>(
            r#"
            SELECT rowid AS chunk_id, rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(fts_query)
        .bind(i64::try_from(k).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| KeywordHit {
                chunk_id: r.chunk_id,
                rank: r.rank,
            })
            .collect())
    }

    pub async fn chunk_with_file(&self, chunk_id: i64) -> Result<Option<ChunkWithFile>> {
        let row = sqlx::query_as::<_, ChunkWithFile>(
            r#"
            SELECT c.id AS chunk_id, c.text, c.start_line, c.end_line, c.heading,
                   f.path, f.namespace, f.agent
            FROM chunks c
            JOIN files f ON f.id = c.file_id
            WHERE c.id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let count = |table: &'static str| {
            let pool = &self.pool;
            async move {
                let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                    .fetch_one(pool)
                    .await?;
                Ok::<i64, anyhow::Error>(n)
            }
        };

        Ok(StoreCounts {
            files: count("files").await?,
            chunks: count("chunks").await?,
            vectors: count("chunk_vectors").await?,
            fts_rows: count("chunks_fts").await?,
        })
    }
}

async fn delete_file_rows(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, path: &str) -> Result<()> {
    let chunk_ids = "SELECT c.id FROM chunks c JOIN files f ON f.id = c.file_id WHERE f.path = ?";

    sqlx::query(&format!(
        "DELETE FROM chunk_vectors WHERE chunk_id IN ({})",
        chunk_ids
    ))
    .bind(path)
    .execute(&mut **tx)
    .await?;

    sqlx::query(&format!("DELETE FROM chunks_fts WHERE rowid IN ({})", chunk_ids))
        .bind(path)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM files WHERE path = ?")
        .bind(path)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Delete the index file and its WAL side files, then recreate an empty,
/// initialized index.
pub async fn reset(db_path: &Path, model: &str, dims: usize) -> Result<MemoryStore> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        let path = Path::new(&name);
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    MemoryStore::open(db_path, model, dims).await
}
