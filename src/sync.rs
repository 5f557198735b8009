//! Disk-to-index synchronization.
//!
//! A pass first scans and hashes every candidate file, so an unreadable
//! file aborts before anything is written. It then diffs the scan against
//! the stored `(path, hash)` pairs:
//!
//! | on disk | in index | hash | action |
//! |---------|----------|------|--------|
//! | no | yes | – | delete |
//! | yes | yes | same (and not forced) | unchanged (mtime refreshed) |
//! | yes | yes | differs, or forced | update |
//! | yes | no | – | add |
//!
//! Each added or updated file is chunked, embedded with a single batch call,
//! and written in its own transaction.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};

use crate::chunk::chunk_markdown;
use crate::config::Workspace;
use crate::embedding::Embedder;
use crate::models::{DiscoveredFile, FileRecord, SyncStats};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::scan;
use crate::store::MemoryStore;

pub async fn run_sync(
    ws: &Workspace,
    store: &MemoryStore,
    embedder: &dyn Embedder,
    force: bool,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncStats> {
    let scanned = scan::scan(ws)?;
    let stored: HashMap<String, FileRecord> = store
        .list_files()
        .await?
        .into_iter()
        .map(|f| (f.path.clone(), f))
        .collect();

    let mut stats = SyncStats::default();

    let on_disk: HashSet<&str> = scanned.iter().map(|s| s.file.rel_path.as_str()).collect();
    let mut missing: Vec<&String> = stored
        .keys()
        .filter(|path| !on_disk.contains(path.as_str()))
        .collect();
    missing.sort();
    for path in missing {
        store.delete_file(path).await?;
        tracing::info!(path = %path, "removed from index");
        progress.report(SyncProgressEvent::Deleted { path: path.clone() });
        stats.deleted += 1;
    }

    for item in &scanned {
        let path = item.file.rel_path.clone();
        match stored.get(&path) {
            Some(state) if state.hash == item.hash && !force => {
                if state.mtime != item.file.mtime {
                    store.touch_file(&path, item.file.mtime).await?;
                }
                stats.unchanged += 1;
            }
            Some(_) => {
                let chunks = index_file(ws, store, embedder, &item.file).await?;
                tracing::info!(path = %path, chunks, "re-indexed");
                progress.report(SyncProgressEvent::Updated { path, chunks });
                stats.updated += 1;
            }
            None => {
                let chunks = index_file(ws, store, embedder, &item.file).await?;
                tracing::info!(path = %path, chunks, "indexed");
                progress.report(SyncProgressEvent::Added { path, chunks });
                stats.added += 1;
            }
        }
    }

    tracing::info!(
        added = stats.added,
        updated = stats.updated,
        deleted = stats.deleted,
        unchanged = stats.unchanged,
        "sync complete"
    );
    Ok(stats)
}

/// Chunk, embed and store one file. Returns the number of chunks written.
async fn index_file(
    ws: &Workspace,
    store: &MemoryStore,
    embedder: &dyn Embedder,
    file: &DiscoveredFile,
) -> Result<usize> {
    let bytes = std::fs::read(&file.abs_path)
        .with_context(|| format!("Failed to read {}", file.abs_path.display()))?;
    let hash = scan::hash_bytes(&bytes);
    let content = String::from_utf8(bytes)
        .with_context(|| format!("{} is not valid UTF-8", file.rel_path))?;

    let chunking = &ws.config.chunking;
    let chunks = chunk_markdown(&content, chunking.chunk_size_tokens, chunking.overlap_tokens);

    let vectors = if chunks.is_empty() {
        Vec::new()
    } else {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        embedder
            .embed(&texts)
            .await
            .with_context(|| format!("Failed to embed {}", file.rel_path))?
    };

    store.replace_file(file, &hash, &chunks, &vectors).await?;
    tracing::debug!(path = %file.rel_path, hash = %hash, "stored");
    Ok(chunks.len())
}

/// Whether the index disagrees with the disk: a different set of paths, or
/// any path whose stored mtime differs from the file's current one.
pub async fn needs_sync(ws: &Workspace, store: &MemoryStore) -> Result<bool> {
    let disk = scan::disk_mtimes(ws)?;
    let stored = store.file_mtimes().await?;
    if disk.len() != stored.len() {
        return Ok(true);
    }
    Ok(disk
        .iter()
        .any(|(path, mtime)| stored.get(path).map_or(true, |m| m != mtime)))
}
