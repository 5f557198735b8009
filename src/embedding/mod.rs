//! Embedding providers and vector utilities.
//!
//! Every provider implements [`Embedder`]:
//! - **local** ([`local::LocalEmbedder`]): fastembed, loaded once per process.
//! - **openai** / **ollama** ([`remote`]): HTTP APIs with batching, retry and backoff.
//! - **hash** ([`hashing::HashEmbedder`]): FNV-1a feature hashing, offline and deterministic.
//!
//! Vectors are stored as little-endian `f32` BLOBs ([`vec_to_blob`] /
//! [`blob_to_vec`]); nearest-neighbour search uses [`l2_distance`].
//!
//! # Retry Strategy
//!
//! The HTTP providers retry transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

pub mod hashing;
#[cfg(feature = "local-embeddings-fastembed")]
pub mod local;
pub mod remote;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::OnceCell;

use crate::config::EmbeddingConfig;
use crate::error::MemoryError;

/// Turns text into fixed-length vectors.
///
/// Implementations must be safe to call concurrently and must return
/// vectors of exactly [`Embedder::dims`] elements.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the index metadata.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed one text and return the vector as little-endian `f32` bytes.
    async fn embed_one(&self, text: &str) -> Result<Vec<u8>> {
        let vector = self
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))?;
        Ok(vec_to_blob(&vector))
    }
}

/// Check a provider response: one vector per input, each of `dims` length.
pub fn check_vectors(dims: usize, inputs: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != inputs {
        bail!(
            "Embedding provider returned {} vectors for {} inputs",
            vectors.len(),
            inputs
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(MemoryError::DimensionMismatch {
            expected: dims,
            actual: bad.len(),
        }
        .into());
    }
    Ok(())
}

/// Create the [`Embedder`] selected by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | [`local::LocalEmbedder`] (feature `local-embeddings-fastembed`) |
/// | `"openai"` | [`remote::OpenAIEmbedder`] |
/// | `"ollama"` | [`remote::OllamaEmbedder`] |
/// | `"hash"` | [`hashing::HashEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Box::new(hashing::HashEmbedder::new(config.dims))),
        "openai" => Ok(Box::new(remote::OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Box::new(remote::OllamaEmbedder::new(config))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(local::LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed; \
             set embedding.provider to \"hash\", \"openai\" or \"ollama\" otherwise"
        ),
        other => Err(MemoryError::UnknownProvider(other.to_string()).into()),
    }
}

/// A value initialized at most once per process, on first use.
///
/// Concurrent first callers wait on the same initialization; exactly one
/// loader runs. A failed load leaves the cell empty so a later call retries.
pub struct SharedModel<T> {
    cell: OnceCell<T>,
}

impl<T> SharedModel<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cell.get_or_try_init(load).await
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T> Default for SharedModel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use forge_memory::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Euclidean distance between two vectors of equal length.
///
/// Returns `f32::INFINITY` when the lengths differ.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
