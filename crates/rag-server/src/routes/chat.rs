//! Conversations, chat turns and the stateless ask endpoint.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use rag_chat::ChatReply;
use rag_core::{Conversation, Message, RagError, Role, Source};

use super::{answer_headers, parse_id};
use crate::client::ClientKey;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AskParams {
    pub text: Option<String>,
}

/// One transcript entry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    pub created_at: u64,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            role: message.role,
            content: message.content,
            sources: message.sources,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssistantReply {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

pub async fn create_conversation(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Conversation>), AppError> {
    let conversation = state.orchestrator.create_conversation().await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let id = parse_id(&id, |id| RagError::ConversationNotFound { id })?;
    let messages = state.orchestrator.conversation_messages(id).await?;
    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id, |id| RagError::ConversationNotFound { id })?;
    state.orchestrator.delete_conversation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn post_message(
    State(state): State<AppState>,
    client: ClientKey,
    Path(id): Path<String>,
    body: Result<Json<MessageBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, |id| RagError::ConversationNotFound { id })?;
    let ip_key = client.rate_key();
    let conv_key = format!("conv:{}", id);
    state
        .limiter
        .admit_all(&[ip_key.as_str(), conv_key.as_str()])
        .into_result()?;
    let Json(body) = body?;

    let reply = state.orchestrator.send_message(id, &body.message).await?;
    let headers = answer_headers(&reply.model, reply.sources.len());
    Ok((headers, Json(assistant_reply(reply))).into_response())
}

/// `GET /?text=`: a single question answered as plain text, no memory.
pub async fn ask(
    State(state): State<AppState>,
    client: ClientKey,
    params: Result<Query<AskParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params?;
    let text = params
        .text
        .ok_or_else(|| RagError::invalid_input("the text query parameter is required"))?;
    state.limiter.admit(&client.rate_key()).into_result()?;

    let reply = state.orchestrator.ask(&text).await?;
    let headers = answer_headers(&reply.model, reply.sources.len());
    Ok((headers, reply.content).into_response())
}

fn assistant_reply(reply: ChatReply) -> AssistantReply {
    AssistantReply {
        role: Role::Assistant,
        content: reply.content,
        sources: (!reply.sources.is_empty()).then_some(reply.sources),
    }
}
