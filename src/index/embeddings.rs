//! Embedding provider backed by fastembed (AllMiniLM-L6-v2, 384 dims).
//!
//! The model is heavyweight to load, so it is initialized once per process on
//! first demand; concurrent first callers share the same initialization via
//! the OnceCell guard instead of each triggering a load.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::OnceCell;
use tokio::task;
use tracing::info;

use crate::traits::Embedder;

/// Embedding dimension produced by AllMiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

#[derive(Clone)]
pub struct FastembedEmbedder {
    model: Arc<OnceCell<Arc<TextEmbedding>>>,
}

impl FastembedEmbedder {
    /// Creates the provider without loading the model; the first embedding
    /// request pays the initialization latency.
    pub fn new() -> Self {
        Self {
            model: Arc::new(OnceCell::new()),
        }
    }

    async fn get_model(&self) -> anyhow::Result<Arc<TextEmbedding>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                task::spawn_blocking(|| {
                    let mut options = InitOptions::default();
                    options.model_name = EmbeddingModel::AllMiniLML6V2;
                    options.show_download_progress = false;
                    let model = TextEmbedding::try_new(options)?;
                    info!("embedding model loaded (AllMiniLML6V2)");
                    Ok::<_, anyhow::Error>(Arc::new(model))
                })
                .await?
            })
            .await?;
        Ok(model.clone())
    }
}

impl Default for FastembedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for FastembedEmbedder {
    /// Deterministic for identical input and model version. Runs on a
    /// blocking thread to keep the async runtime responsive.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let model = self.get_model().await?;
        let text = text.to_string();
        let mut vector = task::spawn_blocking(move || {
            let embeddings = model.embed(vec![text], None)?;
            Ok::<_, anyhow::Error>(embeddings.into_iter().next().unwrap_or_default())
        })
        .await??;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Scale to unit length so cosine similarity reduces to a dot product.
/// Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
