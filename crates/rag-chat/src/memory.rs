//! Conversation history: persistence, sliding window and rolling summary.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use ulid::Ulid;

use rag_core::{
    ChatTurn, ComposedPrompt, MemoryConfig, Message, NewMessage, PromptShape, Result, Role,
    Store, TurnRole,
};
use rag_llm::ModelGateway;

use crate::citation::CitationValidator;

/// Condenses earlier turns into a summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, previous: Option<&str>, messages: &[Message]) -> Result<String>;
}

/// Summarizer calling the model gateway without its fallback.
pub struct GatewaySummarizer {
    gateway: Arc<ModelGateway>,
}

impl GatewaySummarizer {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }
}

const SUMMARY_INSTRUCTIONS: &str = "You condense conversations. Summarize the conversation below in one short paragraph. Keep facts, names, numbers and open questions. Do not add anything that is not in the conversation.";

/// The transcript sent for summarization, folding in any previous summary.
pub fn summary_request(previous: Option<&str>, messages: &[Message]) -> String {
    let mut transcript = String::new();
    if let Some(previous) = previous {
        transcript.push_str("Earlier summary: ");
        transcript.push_str(previous);
        transcript.push_str("\n\n");
    }
    transcript.push_str("Conversation:");
    for m in messages {
        let speaker = match m.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::SystemSummary => "Summary",
        };
        transcript.push_str(&format!("\n{}: {}", speaker, m.content));
    }
    transcript
}

#[async_trait]
impl Summarizer for GatewaySummarizer {
    async fn summarize(&self, previous: Option<&str>, messages: &[Message]) -> Result<String> {
        let shape = self.gateway.shape();
        let user = ChatTurn::new(TurnRole::User, summary_request(previous, messages));
        let messages = match shape {
            PromptShape::Anthropic => vec![user],
            PromptShape::WorkersAi => vec![ChatTurn::new(TurnRole::System, SUMMARY_INSTRUCTIONS), user],
        };

        let prompt = ComposedPrompt {
            shape,
            system_prompt: SUMMARY_INSTRUCTIONS.to_string(),
            messages,
        };
        self.gateway.try_generate(&prompt).await
    }
}

/// Approximate token count: words × 1.3 plus a fixed overhead per message.
pub fn estimate_tokens(messages: &[Message], overhead_per_message: usize) -> usize {
    messages
        .iter()
        .map(|m| {
            let words = m.content.split_whitespace().count();
            (words * 13).div_ceil(10) + overhead_per_message
        })
        .sum()
}

pub struct ConversationMemory {
    store: Arc<dyn Store>,
    config: MemoryConfig,
    citations: Arc<CitationValidator>,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn Store>, config: MemoryConfig, citations: Arc<CitationValidator>) -> Self {
        Self {
            store,
            config,
            citations,
        }
    }

    /// Every message of the conversation in stored order, archived included.
    pub async fn load_history(&self, conversation_id: Ulid) -> Result<Vec<Message>> {
        self.store.list_messages(conversation_id).await
    }

    pub async fn persist(&self, message: NewMessage) -> Result<Message> {
        self.store.insert_message(message).await
    }

    /// Persist the user's message unless it is already the unanswered
    /// latest message, so a retried turn does not duplicate it.
    pub async fn persist_user_turn(&self, conversation_id: Ulid, content: &str) -> Result<Message> {
        let history = self.store.list_messages(conversation_id).await?;
        let latest = history
            .into_iter()
            .rev()
            .find(|m| !m.archived && m.role != Role::SystemSummary);

        if let Some(latest) = latest {
            if latest.role == Role::User && latest.content == content {
                debug!("Reusing unanswered user message {}", latest.id);
                return Ok(latest);
            }
        }
        self.store
            .insert_message(NewMessage::user(conversation_id, content))
            .await
    }

    /// Active messages for the prompt: `[summary] + recent turns`.
    ///
    /// Summarizes the overflow when the window is exceeded or the token
    /// estimate is above the threshold. On summary failure the full active
    /// history is returned instead.
    pub async fn apply_window(
        &self,
        conversation_id: Ulid,
        history: Vec<Message>,
        summarizer: &dyn Summarizer,
    ) -> Vec<Message> {
        let active: Vec<Message> = history.into_iter().filter(|m| !m.archived).collect();
        let summary = active
            .iter()
            .rev()
            .find(|m| m.role == Role::SystemSummary)
            .cloned();
        let turns: Vec<Message> = active
            .into_iter()
            .filter(|m| m.role != Role::SystemSummary)
            .collect();

        let window = self.config.max_chat_history;
        let tokens = estimate_tokens(&turns, self.config.message_overhead_tokens)
            + summary
                .as_ref()
                .map(|s| estimate_tokens(std::slice::from_ref(s), self.config.message_overhead_tokens))
                .unwrap_or(0);
        let over_tokens = tokens > self.config.token_threshold;

        if turns.len() <= window && !over_tokens {
            return with_summary(summary, turns);
        }

        let protected = protected_start(&turns);
        let cut = if over_tokens {
            protected
        } else {
            turns.len().saturating_sub(window).min(protected)
        };
        if cut == 0 {
            return with_summary(summary, turns);
        }

        debug!(
            "Conversation {} over limit ({} turns, ~{} tokens), summarizing {}",
            conversation_id,
            turns.len(),
            tokens,
            cut
        );

        let overflow = &turns[..cut];
        let summary_text = match summarizer
            .summarize(summary.as_ref().map(|s| s.content.as_str()), overflow)
            .await
        {
            Ok(text) => self.citations.strip_all(&text),
            Err(e) => {
                warn!(
                    "Summarization failed for conversation {}, using full history: {}",
                    conversation_id, e
                );
                return with_summary(summary, turns);
            }
        };
        if summary_text.is_empty() {
            warn!("Empty summary for conversation {}, using full history", conversation_id);
            return with_summary(summary, turns);
        }

        let new_summary = match self
            .store
            .insert_message(NewMessage::summary(conversation_id, &summary_text))
            .await
        {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    "Failed to persist summary for conversation {}, using full history: {}",
                    conversation_id, e
                );
                return with_summary(summary, turns);
            }
        };

        let mut archived: Vec<Ulid> = overflow.iter().map(|m| m.id).collect();
        if let Some(old) = &summary {
            archived.push(old.id);
        }
        if let Err(e) = self.store.archive_messages(conversation_id, &archived).await {
            warn!(
                "Failed to archive {} summarized messages of {}: {}",
                archived.len(),
                conversation_id,
                e
            );
        }

        info!(
            "Summarized {} messages of conversation {}",
            overflow.len(),
            conversation_id
        );
        with_summary(Some(new_summary), turns[cut..].to_vec())
    }
}

/// Index of the second-to-last user message: everything from there on
/// stays verbatim.
fn protected_start(turns: &[Message]) -> usize {
    turns
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, m)| m.role == Role::User)
        .map(|(i, _)| i)
        .take(2)
        .last()
        .unwrap_or(0)
}

fn with_summary(summary: Option<Message>, turns: Vec<Message>) -> Vec<Message> {
    summary.into_iter().chain(turns).collect()
}
