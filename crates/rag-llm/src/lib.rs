//! rag-llm - Generation providers for the chat service
//!
//! Two interchangeable backends (Anthropic and Cloudflare Workers AI) behind
//! the `Generator` trait, and a `ModelGateway` that adds a bounded wait,
//! retry with backoff, a per-provider circuit breaker and a fallback answer.

pub mod anthropic;
pub mod breaker;
pub mod gateway;
mod http;
pub mod retry;
pub mod workers_ai;

use std::sync::Arc;

use tracing::info;

pub use anthropic::AnthropicGenerator;
pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker, Permit};
pub use gateway::{fallback_answer, GenerationOutcome, ModelGateway, FALLBACK_MODEL};
pub use rag_core::Generator;
pub use retry::RetryPolicy;
pub use workers_ai::WorkersAiGenerator;

use rag_core::{ProviderCredentials, ProviderSelection, RagConfig, Result};

/// Pick the generation backend from the configured credentials.
pub fn create_generator(
    config: &RagConfig,
    credentials: &ProviderCredentials,
) -> Result<Arc<dyn Generator>> {
    let generator: Arc<dyn Generator> = match credentials.selection() {
        ProviderSelection::Anthropic { api_key } => {
            Arc::new(AnthropicGenerator::new(&config.generation, api_key)?)
        }
        ProviderSelection::WorkersAi {
            account_id,
            api_token,
        } => Arc::new(WorkersAiGenerator::new(
            &config.generation,
            &account_id,
            &api_token,
        )?),
    };

    info!(
        "Using {} generation with model {}",
        generator.provider(),
        generator.model()
    );
    Ok(generator)
}
