//! Local inference via fastembed.
//!
//! The ONNX model is downloaded from Hugging Face on first use and cached.
//! It is loaded at most once per process into [`MODEL`]; every
//! [`LocalEmbedder`] shares that instance. Loading and inference run on the
//! blocking thread pool.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Mutex;

use super::{check_vectors, Embedder, SharedModel};
use crate::config::EmbeddingConfig;

struct LoadedModel {
    name: String,
    model: Mutex<fastembed::TextEmbedding>,
}

static MODEL: SharedModel<LoadedModel> = SharedModel::new();

pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: to_fastembed_model(&config.model)?,
            model_name: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size,
        })
    }

    async fn loaded(&self) -> Result<&'static LoadedModel> {
        let model = self.model.clone();
        let name = self.model_name.clone();
        let loaded = MODEL
            .get_or_load(|| async move {
                tracing::info!(model = %name, "loading local embedding model");
                tokio::task::spawn_blocking(move || {
                    let embedding = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(true),
                    )
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                    Ok::<_, anyhow::Error>(LoadedModel {
                        name,
                        model: Mutex::new(embedding),
                    })
                })
                .await?
            })
            .await?;

        if loaded.name != self.model_name {
            bail!(
                "Local embedding model '{}' is already loaded in this process; cannot switch to '{}'",
                loaded.name,
                self.model_name
            );
        }
        Ok(loaded)
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let loaded = self.loaded().await?;
        let batch_size = self.batch_size;
        let inputs = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = loaded
                .model
                .lock()
                .map_err(|_| anyhow!("Local embedding model lock poisoned"))?;
            model
                .embed(inputs, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await??;

        check_vectors(self.dims, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}
