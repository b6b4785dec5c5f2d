//! Model gateway: timeout, retry and circuit breaking around a generator,
//! with a deterministic fallback answer when generation is unavailable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use rag_core::{ComposedPrompt, Generator, PromptShape, RagConfig, RagError, Result, Source};

use crate::breaker::{BreakerConfig, BreakerRegistry};
use crate::retry::RetryPolicy;

/// Model name reported when the answer was built without a model call.
pub const FALLBACK_MODEL: &str = "fallback";

const UNAVAILABLE_NO_SOURCES: &str = "The answer service is temporarily unavailable and no relevant sources were found. Please try again later.";
const UNAVAILABLE_WITH_SOURCES: &str = "The answer service is temporarily unavailable. These retrieved sources may help:";

/// Result of a gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub text: String,
    /// Model that produced `text`, or [`FALLBACK_MODEL`].
    pub model: String,
    pub fallback: bool,
}

pub struct ModelGateway {
    generator: Arc<dyn Generator>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ModelGateway {
    pub fn new(
        generator: Arc<dyn Generator>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            breakers,
            retry,
            timeout,
        }
    }

    /// Gateway with a fresh breaker registry, configured from `config`.
    pub fn from_config(generator: Arc<dyn Generator>, config: &RagConfig) -> Self {
        Self::new(
            generator,
            Arc::new(BreakerRegistry::new(BreakerConfig::from(&config.resilience))),
            RetryPolicy::from(&config.resilience),
            Duration::from_secs(config.generation.timeout_secs),
        )
    }

    pub fn provider(&self) -> &str {
        self.generator.provider()
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    pub fn shape(&self) -> PromptShape {
        self.generator.shape()
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Generate an answer, falling back to a source listing on any failure.
    pub async fn generate(&self, prompt: &ComposedPrompt, sources: &[Source]) -> GenerationOutcome {
        match self.try_generate(prompt).await {
            Ok(text) => GenerationOutcome {
                text,
                model: self.generator.model().to_string(),
                fallback: false,
            },
            Err(e) => {
                warn!("Generation unavailable, serving fallback: {}", e);
                GenerationOutcome {
                    text: fallback_answer(sources),
                    model: FALLBACK_MODEL.to_string(),
                    fallback: true,
                }
            }
        }
    }

    /// Generate without a fallback. A whole retried call counts as one
    /// breaker outcome; a call dropped before finishing records none.
    pub async fn try_generate(&self, prompt: &ComposedPrompt) -> Result<String> {
        let provider = self.generator.provider();
        let breaker = self.breakers.get(provider);
        let permit = breaker
            .try_acquire(Instant::now())
            .ok_or_else(|| RagError::CircuitOpen {
                provider: provider.to_string(),
            })?;

        let start = Instant::now();
        let result = self.retry.run(provider, || self.attempt(prompt)).await;

        match &result {
            Ok(text) => {
                info!(
                    "Generated {} chars with {} in {:?}",
                    text.len(),
                    self.generator.model(),
                    start.elapsed()
                );
                permit.success();
            }
            Err(_) => permit.failure(Instant::now()),
        }
        result
    }

    async fn attempt(&self, prompt: &ComposedPrompt) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.generator.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(RagError::transient(format!(
                "{} call timed out after {:?}",
                self.generator.provider(),
                self.timeout
            ))),
        }
    }
}

/// Deterministic answer listing the retrieved sources with their citations.
pub fn fallback_answer(sources: &[Source]) -> String {
    if sources.is_empty() {
        return UNAVAILABLE_NO_SOURCES.to_string();
    }

    let mut text = String::from(UNAVAILABLE_WITH_SOURCES);
    text.push('\n');
    for source in sources {
        text.push_str(&format!("\n- {} [source: {}]", source.text, source.id));
    }
    text
}
