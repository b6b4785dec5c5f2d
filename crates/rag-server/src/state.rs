//! Shared application state.

use std::sync::Arc;

use tracing::info;

use rag_chat::{ChatOrchestrator, RateLimiter, Services};
use rag_chunk::RecursiveChunker;
use rag_core::{
    BlobStore, Embedder, ProviderCredentials, RagConfig, RagError, Result, Store, VectorIndex,
};
use rag_embed::create_embedder;
use rag_llm::{create_generator, ModelGateway};
use rag_store::{MemoryStore, MemoryVectorIndex, SqliteStore};

/// Everything a handler needs. Rate-limit windows and breakers live here
/// rather than in globals so tests can build isolated instances.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<RagConfig>,
}

impl AppState {
    /// Assemble state from already-built collaborators.
    pub fn new(config: RagConfig, services: Services) -> Result<Self> {
        check_dimensions(services.embedder.as_ref(), services.index.as_ref())?;

        let orchestrator = ChatOrchestrator::new(&config, services)?;
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            config: Arc::new(config),
        })
    }

    /// Open the SQLite database named in the config.
    pub fn open(config: RagConfig, credentials: &ProviderCredentials) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.database, config.embedding.dimension)?);
        info!("Using database at {}", config.database.path.display());

        let services = build_services(&config, credentials, store.clone(), store.clone(), store)?;
        Self::new(config, services)
    }

    /// Keep everything in process memory. Nothing survives a restart.
    pub fn ephemeral(config: RagConfig, credentials: &ProviderCredentials) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryVectorIndex::new(config.embedding.dimension));
        info!("Using in-memory storage");

        let services = build_services(&config, credentials, store.clone(), store, index)?;
        Self::new(config, services)
    }
}

/// Build providers from config and environment credentials.
pub fn build_services(
    config: &RagConfig,
    credentials: &ProviderCredentials,
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn VectorIndex>,
) -> Result<Services> {
    let embedder = create_embedder(config, credentials)?;
    let generator = create_generator(config, credentials)?;

    Ok(Services {
        store,
        blobs,
        index,
        embedder,
        chunker: Arc::new(RecursiveChunker::new()),
        gateway: Arc::new(ModelGateway::from_config(generator, config)),
    })
}

/// The embedder must produce vectors the index was created for.
pub fn check_dimensions(embedder: &dyn Embedder, index: &dyn VectorIndex) -> Result<()> {
    if embedder.dimension() != index.dimension() {
        return Err(RagError::config(format!(
            "embedder {} produces {}-dimensional vectors but the index holds {}",
            embedder.model_name(),
            embedder.dimension(),
            index.dimension()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_embed::HashingEmbedder;

    #[test]
    fn test_dimension_mismatch_is_config_error() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let index = MemoryVectorIndex::new(128);

        let err = check_dimensions(&embedder, &index).unwrap_err();
        assert!(matches!(err, RagError::Config { .. }));
        assert!(check_dimensions(&embedder, &MemoryVectorIndex::new(64)).is_ok());
    }

    #[test]
    fn test_ephemeral_state_builds_with_defaults() {
        let config = RagConfig {
            embedding: rag_core::EmbeddingConfig {
                dimension: 64,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(AppState::ephemeral(config, &ProviderCredentials::default()).is_ok());
    }
}
