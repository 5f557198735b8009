//! Markdown file discovery.
//!
//! Walks the memory directory and the auxiliary scan directories, derives
//! each file's namespace and agent, and hashes its contents.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Workspace;
use crate::error::MemoryError;
use crate::models::{DiscoveredFile, Namespace, ScannedFile};

/// Enumerate every `.md` file the index should contain, sorted by path.
pub fn discover(ws: &Workspace) -> Result<Vec<DiscoveredFile>> {
    let memory_dir = ws.memory_dir();
    if !memory_dir.is_dir() {
        return Err(MemoryError::MissingMemoryDir(memory_dir).into());
    }

    let exclude_set = build_globset(&ws.config.paths.exclude_globs)?;
    let mut files = Vec::new();

    walk_markdown(&memory_dir, &exclude_set, |path, rel_to_dir| {
        let (namespace, agent) = detect_namespace(rel_to_dir);
        files.push(discovered(ws, path, namespace, agent)?);
        Ok(())
    })?;

    for dir in ws.extra_scan_dirs() {
        // Already covered when an extra dir lives inside the memory dir.
        if dir.starts_with(&memory_dir) {
            continue;
        }
        walk_markdown(&dir, &exclude_set, |path, _| {
            files.push(discovered(ws, path, Namespace::Project, None)?);
            Ok(())
        })?;
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    files.dedup_by(|a, b| a.rel_path == b.rel_path);
    Ok(files)
}

/// Discover and hash every file. Fails on the first unreadable or
/// non-UTF-8 file, naming its path.
pub fn scan(ws: &Workspace) -> Result<Vec<ScannedFile>> {
    discover(ws)?
        .into_iter()
        .map(|file| {
            let bytes = std::fs::read(&file.abs_path)
                .with_context(|| format!("Failed to read {}", file.abs_path.display()))?;
            std::str::from_utf8(&bytes)
                .with_context(|| format!("{} is not valid UTF-8", file.rel_path))?;
            Ok(ScannedFile {
                hash: hash_bytes(&bytes),
                file,
            })
        })
        .collect()
}

/// On-disk `path → mtime` map, used for staleness checks.
pub fn disk_mtimes(ws: &Workspace) -> Result<HashMap<String, f64>> {
    Ok(discover(ws)?
        .into_iter()
        .map(|f| (f.rel_path, f.mtime))
        .collect())
}

/// Classify a path relative to the memory directory.
///
/// `MEMORY.md` at the root is project memory, `sessions/**` are session
/// logs, `agents/**` are agent notes (the agent is the file stem);
/// everything else is project memory.
pub fn detect_namespace(rel_to_memory_dir: &Path) -> (Namespace, Option<String>) {
    let mut components = rel_to_memory_dir.components();
    let first = components
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string());
    let nested = components.next().is_some();

    match first.as_deref() {
        Some("sessions") if nested => (Namespace::Session, None),
        Some("agents") if nested => {
            let agent = rel_to_memory_dir
                .file_stem()
                .map(|s| s.to_string_lossy().to_string());
            (Namespace::Agent, agent)
        }
        _ => (Namespace::Project, None),
    }
}

/// SHA-256 hex digest.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn walk_markdown<F>(dir: &Path, exclude_set: &GlobSet, mut visit: F) -> Result<()>
where
    F: FnMut(&Path, &Path) -> Result<()>,
{
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() || !is_markdown(entry.path()) {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        visit(path, relative)?;
    }
    Ok(())
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

fn discovered(
    ws: &Workspace,
    path: &Path,
    namespace: Namespace,
    agent: Option<String>,
) -> Result<DiscoveredFile> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let mtime = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    let relative = path.strip_prefix(&ws.root).unwrap_or(path);
    let rel_path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    Ok(DiscoveredFile {
        rel_path,
        abs_path: path.to_path_buf(),
        namespace,
        agent,
        mtime,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).with_context(|| format!("Invalid exclude glob: {}", pattern))?,
        );
    }
    Ok(builder.build()?)
}
