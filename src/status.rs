//! Index statistics and health overview.
//!
//! Summarizes what is indexed: file and chunk counts, per-namespace
//! breakdown, index size and the embedding metadata it was built with.
//! Reading status never creates the index.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Workspace;
use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub project_root: String,
    pub memory_dir: String,
    pub db_path: String,
    pub db_exists: bool,
    pub files: i64,
    pub chunks: i64,
    pub vectors: i64,
    pub namespaces: BTreeMap<String, i64>,
    pub db_size_bytes: u64,
    pub db_size: String,
    pub embedding_model: Option<String>,
    pub embedding_dim: Option<usize>,
    pub schema_version: Option<String>,
    /// Unix timestamp of the most recently indexed file.
    pub last_indexed_at: Option<i64>,
}

pub async fn collect(ws: &Workspace) -> Result<StatusReport> {
    let db_path = ws.db_path();
    let mut report = StatusReport {
        project_root: ws.root.display().to_string(),
        memory_dir: ws.memory_dir().display().to_string(),
        db_path: db_path.display().to_string(),
        db_exists: db_path.is_file(),
        files: 0,
        chunks: 0,
        vectors: 0,
        namespaces: BTreeMap::new(),
        db_size_bytes: 0,
        db_size: format_bytes(0),
        embedding_model: None,
        embedding_dim: None,
        schema_version: None,
        last_indexed_at: None,
    };

    if !report.db_exists {
        return Ok(report);
    }

    report.db_size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    report.db_size = format_bytes(report.db_size_bytes);

    let pool = db::connect_existing(&db_path).await?;

    report.files = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(&pool)
        .await?;
    report.chunks = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    report.vectors = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;
    report.last_indexed_at = sqlx::query_scalar("SELECT MAX(indexed_at) FROM files")
        .fetch_one(&pool)
        .await?;

    let namespace_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT namespace, COUNT(*) FROM files GROUP BY namespace")
            .fetch_all(&pool)
            .await?;
    report.namespaces = namespace_rows.into_iter().collect();

    let meta: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM meta")
        .fetch_all(&pool)
        .await?;
    for (key, value) in meta {
        match key.as_str() {
            "embedding_model" => report.embedding_model = Some(value),
            "embedding_dim" => report.embedding_dim = value.parse().ok(),
            "schema_version" => report.schema_version = Some(value),
            _ => {}
        }
    }

    pool.close().await;
    Ok(report)
}

/// Render a report as the text shown by `status`.
pub fn render_text(report: &StatusReport) -> String {
    let mut out = String::new();
    out.push_str("Forge Memory — Index Status\n");
    out.push_str("===========================\n\n");
    out.push_str(&format!("  Project:     {}\n", report.project_root));
    out.push_str(&format!("  Memory dir:  {}\n", report.memory_dir));
    out.push_str(&format!("  Index:       {}\n", report.db_path));

    if !report.db_exists {
        out.push_str("\n  Index not built yet. Run `forge-memory sync`.\n");
        return out;
    }

    out.push_str(&format!("  Size:        {}\n\n", report.db_size));
    out.push_str(&format!("  Files:       {}\n", report.files));
    out.push_str(&format!("  Chunks:      {}\n", report.chunks));
    out.push_str(&format!(
        "  Model:       {} ({} dims)\n",
        report.embedding_model.as_deref().unwrap_or("unknown"),
        report
            .embedding_dim
            .map(|d| d.to_string())
            .unwrap_or_else(|| "?".to_string())
    ));
    out.push_str(&format!(
        "  Schema:      v{}\n",
        report.schema_version.as_deref().unwrap_or("?")
    ));
    out.push_str(&format!(
        "  Last sync:   {}\n",
        report
            .last_indexed_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    ));

    if !report.namespaces.is_empty() {
        out.push_str("\n  By namespace:\n");
        out.push_str(&format!("  {:<12} {:>6}\n", "NAMESPACE", "FILES"));
        out.push_str(&format!("  {}\n", "-".repeat(19)));
        for (namespace, count) in &report.namespaces {
            out.push_str(&format!("  {:<12} {:>6}\n", namespace, count));
        }
    }

    out
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
