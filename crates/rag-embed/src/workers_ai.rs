//! Cloudflare Workers AI embedding provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use rag_core::{Embedder, EmbeddingConfig, RagError, Result};

/// Embedder calling `POST {base}/accounts/{account}/ai/run/{model}`.
///
/// Transport errors, HTTP 429 and 5xx are retried with exponential backoff;
/// other client errors fail immediately.
pub struct WorkersAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_token: String,
    model: String,
    dimension: usize,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    success: bool,
    result: Option<EmbeddingResult>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResult {
    #[serde(default)]
    data: Vec<Vec<f32>>,
}

impl WorkersAiEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        base_url: &str,
        account_id: &str,
        api_token: &str,
    ) -> Result<Self> {
        if account_id.is_empty() || api_token.is_empty() {
            return Err(RagError::config(
                "workers-ai embeddings need CLOUDFLARE_ACCOUNT_ID and CLOUDFLARE_API_TOKEN",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: run_url(base_url, account_id, &config.model),
            api_token: api_token.to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries,
        })
    }

    async fn call(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "text": texts });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(250 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_token)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: RunResponse = response.json().await.map_err(|e| {
                            RagError::embedding(format!("Invalid Workers AI response: {}", e))
                        })?;
                        return parse_run_response(parsed);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = RagError::embedding(format!(
                        "Workers AI error {}: {}",
                        status, body_text
                    ));

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!("Embedding attempt {} failed: {}", attempt + 1, status);
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    warn!("Embedding attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(RagError::embedding(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RagError::embedding("Embedding failed after retries")))
    }
}

fn run_url(base_url: &str, account_id: &str, model: &str) -> String {
    format!(
        "{}/accounts/{}/ai/run/{}",
        base_url.trim_end_matches('/'),
        account_id,
        model
    )
}

fn parse_run_response(resp: RunResponse) -> Result<Vec<Vec<f32>>> {
    match resp.result {
        Some(result) if resp.success || !result.data.is_empty() => Ok(result.data),
        _ => Err(RagError::embedding("Workers AI response has no embeddings")),
    }
}

#[async_trait]
impl Embedder for WorkersAiEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} texts with {}", texts.len(), self.model);
        self.call(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
