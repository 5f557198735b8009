//! Core data models used throughout forge-memory.
//!
//! These types represent the files, chunks, and search results that flow
//! through the synchronization and retrieval pipeline. Row types derive
//! [`sqlx::FromRow`] so every query is decoded into a named struct.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Role of an indexed markdown file. Stored as lowercase `TEXT`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Namespace {
    Project,
    Session,
    Agent,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Project => "project",
            Namespace::Session => "session",
            Namespace::Agent => "agent",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(Namespace::Project),
            "session" => Ok(Namespace::Session),
            "agent" => Ok(Namespace::Agent),
            other => Err(MemoryError::UnknownNamespace(other.to_string())),
        }
    }
}

/// A markdown file found on disk, before it is written to the index.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the project root, `/`-separated. Unique key in the store.
    pub rel_path: String,
    pub abs_path: std::path::PathBuf,
    pub namespace: Namespace,
    /// Agent name (file stem), only for [`Namespace::Agent`].
    pub agent: Option<String>,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: f64,
}

/// A discovered file plus the SHA-256 digest of its bytes.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub file: DiscoveredFile,
    pub hash: String,
}

/// A file record as stored in the `files` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub namespace: Namespace,
    pub agent: Option<String>,
    pub mtime: f64,
    pub hash: String,
    pub chunk_count: i64,
    pub indexed_at: i64,
}

/// One chunk produced by the markdown chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownChunk {
    pub text: String,
    /// First line of the chunk, 1-based, inclusive.
    pub start_line: usize,
    /// Last line of the chunk, 1-based, inclusive.
    pub end_line: usize,
    /// The `##`/`###` heading line of the enclosing section.
    pub heading: Option<String>,
    pub token_count: usize,
}

/// A stored chunk joined with its owning file, used to build search results.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChunkWithFile {
    pub chunk_id: i64,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub heading: Option<String>,
    pub path: String,
    pub namespace: Namespace,
    pub agent: Option<String>,
}

/// Counts reported by a synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// A search hit returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub text: String,
    /// Path of the owning file, relative to the project root.
    pub file: String,
    pub namespace: Namespace,
    pub heading: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    /// Fused relevance score in `[0, 1]`, rounded to 4 decimals.
    pub score: f64,
}
