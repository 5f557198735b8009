//! TOML configuration and project-root discovery.
//!
//! Every section has defaults, so an absent config file yields a working
//! setup. [`Workspace`] pairs a loaded [`Config`] with the project root and
//! resolves all on-disk locations from it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::MemoryError;

/// Name of the config file looked up inside the memory directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// Memory directory, relative to the project root.
    pub memory_dir: PathBuf,
    /// Index file name inside the memory directory.
    pub db_file: String,
    /// Auxiliary directories (relative to the project root) indexed as `project`.
    pub extra_scan_dirs: Vec<PathBuf>,
    /// Glob patterns, relative to each scanned directory, to skip.
    pub exclude_globs: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            memory_dir: PathBuf::from(".forge/memory"),
            db_file: "index.sqlite".to_string(),
            extra_scan_dirs: vec![PathBuf::from("docs")],
            exclude_globs: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 400,
            overlap_tokens: 80,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub vector_weight: f64,
    pub fts_weight: f64,
    pub default_limit: usize,
    pub default_threshold: f64,
    /// Each retrieval path fetches `limit × fetch_multiplier` candidates.
    pub fetch_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            fts_weight: 0.3,
            default_limit: 5,
            default_threshold: 0.3,
            fetch_multiplier: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dims: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "all-minilm-l6-v2".to_string(),
            dims: 384,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

impl Config {
    /// Check value ranges. Called by [`load_config`]; call it yourself when
    /// building a `Config` in code.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> anyhow::Error { MemoryError::InvalidConfig(msg).into() };

        if self.chunking.chunk_size_tokens == 0 {
            return Err(invalid("chunking.chunk_size_tokens must be > 0".into()));
        }
        if self.chunking.overlap_tokens >= self.chunking.chunk_size_tokens {
            return Err(invalid(
                "chunking.overlap_tokens must be smaller than chunking.chunk_size_tokens".into(),
            ));
        }

        let r = &self.retrieval;
        for (name, w) in [("vector_weight", r.vector_weight), ("fts_weight", r.fts_weight)] {
            if !w.is_finite() || w < 0.0 {
                return Err(invalid(format!("retrieval.{} must be a finite value >= 0", name)));
            }
        }
        if r.vector_weight + r.fts_weight <= 0.0 {
            return Err(invalid(
                "retrieval.vector_weight and retrieval.fts_weight cannot both be 0".into(),
            ));
        }
        if r.default_limit < 1 {
            return Err(invalid("retrieval.default_limit must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&r.default_threshold) {
            return Err(invalid("retrieval.default_threshold must be in [0.0, 1.0]".into()));
        }
        if r.fetch_multiplier < 1 {
            return Err(invalid("retrieval.fetch_multiplier must be >= 1".into()));
        }

        if self.embedding.dims == 0 {
            return Err(invalid("embedding.dims must be > 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size must be > 0".into()));
        }
        match self.embedding.provider.as_str() {
            "local" | "openai" | "ollama" | "hash" => {}
            other => return Err(MemoryError::UnknownProvider(other.to_string()).into()),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config.validate()?;
    Ok(config)
}

/// Walk up from `start` until a directory containing `memory_dir` is found.
pub fn find_project_root(start: &Path, memory_dir: &Path) -> Result<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(memory_dir).is_dir() {
            return Ok(dir.to_path_buf());
        }
        current = dir.parent();
    }
    Err(MemoryError::MemoryDirNotFound {
        start: start.to_path_buf(),
        memory_dir: memory_dir.to_path_buf(),
    }
    .into())
}

/// A project root together with the configuration that applies to it.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Resolve the workspace for a CLI invocation.
    ///
    /// With an explicit config path, that file decides where the memory
    /// directory lives. Otherwise the default memory directory is located
    /// first and `<memory_dir>/config.toml` is loaded when it exists.
    pub fn discover(start: &Path, config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => {
                let config = load_config(path)?;
                let root = find_project_root(start, &config.paths.memory_dir)?;
                Ok(Self::new(root, config))
            }
            None => {
                let defaults = Config::default();
                let root = find_project_root(start, &defaults.paths.memory_dir)?;
                let candidate = root.join(&defaults.paths.memory_dir).join(CONFIG_FILE_NAME);
                let config = if candidate.is_file() {
                    load_config(&candidate)?
                } else {
                    defaults
                };
                Ok(Self::new(root, config))
            }
        }
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join(&self.config.paths.memory_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.memory_dir().join(&self.config.paths.db_file)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.memory_dir().join("sessions")
    }

    pub fn memory_file(&self) -> PathBuf {
        self.memory_dir().join("MEMORY.md")
    }

    /// Auxiliary directories that exist on disk.
    pub fn extra_scan_dirs(&self) -> Vec<PathBuf> {
        self.config
            .paths
            .extra_scan_dirs
            .iter()
            .map(|d| self.root.join(d))
            .filter(|d| d.is_dir())
            .collect()
    }
}
