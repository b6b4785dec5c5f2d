//! rag-embed - embedding providers
//!
//! This crate turns text into fixed-dimension vectors for similarity search.
//!
//! # Providers
//!
//! - [`HashingEmbedder`]: local feature hashing, no network (default)
//! - [`WorkersAiEmbedder`]: Cloudflare Workers AI over HTTPS

use std::sync::Arc;

use tracing::info;

use rag_core::{ProviderCredentials, RagConfig, RagError, Result};

mod hashing;
mod workers_ai;

pub use hashing::{terms, HashingEmbedder};
pub use workers_ai::WorkersAiEmbedder;

// Re-export the Embedder trait for convenience
pub use rag_core::Embedder;

/// Build the embedder named by `embedding.provider`.
pub fn create_embedder(
    config: &RagConfig,
    credentials: &ProviderCredentials,
) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.embedding.provider.as_str() {
        "hashing" => Arc::new(HashingEmbedder::new(config.embedding.dimension)?),
        "workers-ai" => Arc::new(WorkersAiEmbedder::new(
            &config.embedding,
            &config.generation.workers_base_url,
            credentials.cloudflare_account_id.as_deref().unwrap_or_default(),
            credentials.cloudflare_api_token.as_deref().unwrap_or_default(),
        )?),
        other => {
            return Err(RagError::config(format!(
                "Unknown embedding provider: {}",
                other
            )))
        }
    };

    info!(
        "Embedder initialized: model={}, dim={}",
        embedder.model_name(),
        embedder.dimension()
    );
    Ok(embedder)
}

/// Embed `texts` and check that exactly one vector of the right length
/// came back per input.
pub async fn embed_checked(embedder: &dyn Embedder, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder.embed(texts).await?;

    if vectors.len() != texts.len() {
        return Err(RagError::embedding(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }
    let dimension = embedder.dimension();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(RagError::embedding(format!(
            "provider returned a vector of length {}, expected {}",
            bad.len(),
            dimension
        )));
    }
    Ok(vectors)
}

/// L2 normalize a vector.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}
