//! Typed error categories.
//!
//! Most functions return [`anyhow::Result`]; the variants below are the
//! failures callers are expected to tell apart (via `downcast_ref`).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    /// No `<memory_dir>` in the start directory or any of its ancestors.
    #[error("could not find {} in {} or any parent directory", memory_dir.display(), start.display())]
    MemoryDirNotFound { start: PathBuf, memory_dir: PathBuf },

    /// The resolved project root has no memory directory to sync.
    #[error("memory directory not found: {}", .0.display())]
    MissingMemoryDir(PathBuf),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index schema version {stored} is not supported (expected {expected}); run `reset --confirm`")]
    SchemaVersionMismatch { stored: String, expected: String },

    #[error("--confirm flag required to reset the database")]
    ResetNotConfirmed,

    #[error("log message must not be empty")]
    EmptyLogMessage,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown namespace: '{0}' (expected project, session or agent)")]
    UnknownNamespace(String),

    #[error("unknown embedding provider: '{0}' (expected local, openai, ollama or hash)")]
    UnknownProvider(String),
}
