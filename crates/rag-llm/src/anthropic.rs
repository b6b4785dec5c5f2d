//! Anthropic Messages API provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rag_core::{
    ChatTurn, ComposedPrompt, GenerationConfig, Generator, PromptShape, RagError, Result,
    TurnRole,
};

use crate::http::{build_client, status_error, transport_error};

pub const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// Generator for `POST {base}/v1/messages`.
pub struct AnthropicGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<&'a ChatTurn>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!("{}/v1/messages", config.anthropic_base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.anthropic_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn request_body<'a>(&'a self, prompt: &'a ComposedPrompt) -> MessagesRequest<'a> {
        request_body(&self.model, self.max_tokens, self.temperature, prompt)
    }
}

/// The system prompt travels as its own parameter; system turns never enter `messages`.
fn request_body<'a>(
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    prompt: &'a ComposedPrompt,
) -> MessagesRequest<'a> {
    MessagesRequest {
        model,
        max_tokens,
        temperature,
        system: &prompt.system_prompt,
        messages: prompt
            .messages
            .iter()
            .filter(|turn| turn.role != TurnRole::System)
            .collect(),
    }
}

fn parse_response(resp: MessagesResponse) -> Result<String> {
    let text: String = resp
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(RagError::transient("Anthropic returned an empty completion"));
    }
    Ok(text)
}

#[async_trait]
impl Generator for AnthropicGenerator {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn shape(&self) -> PromptShape {
        PromptShape::Anthropic
    }

    async fn generate(&self, prompt: &ComposedPrompt) -> Result<String> {
        debug!(
            "Calling Anthropic {} with {} messages",
            self.model,
            prompt.messages.len()
        );

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, status, &body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| RagError::generation(format!("Invalid Anthropic response: {}", e)))?;
        parse_response(parsed)
    }
}
