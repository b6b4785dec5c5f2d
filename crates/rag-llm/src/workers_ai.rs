//! Cloudflare Workers AI text generation provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rag_core::{
    ChatTurn, ComposedPrompt, GenerationConfig, Generator, PromptShape, RagError, Result,
    TurnRole,
};

use crate::http::{build_client, status_error, transport_error};

pub const PROVIDER: &str = "workers-ai";

/// Generator for `POST {base}/accounts/{account}/ai/run/{model}`.
///
/// This is the default backend. Without credentials it still constructs, and
/// every call fails permanently so the gateway serves its fallback.
pub struct WorkersAiGenerator {
    client: reqwest::Client,
    url: String,
    api_token: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    configured: bool,
}

#[derive(Debug, Serialize)]
struct RunRequest {
    messages: Vec<ChatTurn>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    success: bool,
    result: Option<RunResult>,
}

#[derive(Debug, Deserialize)]
struct RunResult {
    #[serde(default)]
    response: Option<String>,
}

impl WorkersAiGenerator {
    pub fn new(config: &GenerationConfig, account_id: &str, api_token: &str) -> Result<Self> {
        let configured = !account_id.is_empty() && !api_token.is_empty();
        if !configured {
            warn!("Workers AI credentials missing; generation will use the fallback answer");
        }

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!(
                "{}/accounts/{}/ai/run/{}",
                config.workers_base_url.trim_end_matches('/'),
                account_id,
                config.workers_model
            ),
            api_token: api_token.to_string(),
            model: config.workers_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            configured,
        })
    }
}

/// The system prompt leads the message array with role `system`.
fn request_body(max_tokens: u32, temperature: f32, prompt: &ComposedPrompt) -> RunRequest {
    let mut messages = Vec::with_capacity(prompt.messages.len() + 1);
    messages.push(ChatTurn::new(TurnRole::System, prompt.system_prompt.clone()));
    messages.extend(
        prompt
            .messages
            .iter()
            .filter(|turn| turn.role != TurnRole::System)
            .cloned(),
    );

    RunRequest {
        messages,
        max_tokens,
        temperature,
    }
}

fn parse_response(resp: RunResponse) -> Result<String> {
    match resp.result.and_then(|r| r.response) {
        Some(text) if !text.trim().is_empty() => Ok(text),
        Some(_) => Err(RagError::transient("Workers AI returned an empty completion")),
        None if resp.success => Err(RagError::transient("Workers AI returned no response")),
        None => Err(RagError::generation("Workers AI reported failure")),
    }
}

#[async_trait]
impl Generator for WorkersAiGenerator {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn shape(&self) -> PromptShape {
        PromptShape::WorkersAi
    }

    async fn generate(&self, prompt: &ComposedPrompt) -> Result<String> {
        if !self.configured {
            return Err(RagError::generation(
                "Workers AI needs CLOUDFLARE_ACCOUNT_ID and CLOUDFLARE_API_TOKEN",
            ));
        }

        debug!(
            "Calling Workers AI {} with {} messages",
            self.model,
            prompt.messages.len()
        );

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .json(&request_body(self.max_tokens, self.temperature, prompt))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, status, &body));
        }

        let parsed: RunResponse = response
            .json()
            .await
            .map_err(|e| RagError::generation(format!("Invalid Workers AI response: {}", e)))?;
        parse_response(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_leads_with_system_turn() {
        let prompt = ComposedPrompt {
            shape: PromptShape::WorkersAi,
            system_prompt: "Answer from sources.".to_string(),
            messages: vec![
                ChatTurn::new(TurnRole::User, "Hi"),
                ChatTurn::new(TurnRole::Assistant, "Hello"),
                ChatTurn::new(TurnRole::User, "What is a dog?"),
            ],
        };
        let body = serde_json::to_value(request_body(128, 0.2, &prompt)).unwrap();

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Answer from sources.");
        assert_eq!(messages[3]["content"], "What is a dog?");
    }

    #[test]
    fn test_parse_response() {
        let ok: RunResponse =
            serde_json::from_str(r#"{"success":true,"result":{"response":"Dogs are mammals."}}"#)
                .unwrap();
        assert_eq!(parse_response(ok).unwrap(), "Dogs are mammals.");

        let failed: RunResponse =
            serde_json::from_str(r#"{"success":false,"errors":[{"message":"bad"}]}"#).unwrap();
        assert!(!parse_response(failed).unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_permanently() {
        let generator = WorkersAiGenerator::new(&GenerationConfig::default(), "", "").unwrap();
        let prompt = ComposedPrompt {
            shape: PromptShape::WorkersAi,
            system_prompt: String::new(),
            messages: vec![ChatTurn::new(TurnRole::User, "hi")],
        };
        let err = generator.generate(&prompt).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
