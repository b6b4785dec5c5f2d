//! Note ingestion and document management.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use rag_chat::IngestRequest;
use rag_core::{Document, Metadata, RagError};

use super::parse_id;
use crate::client::ClientKey;
use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteBody {
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteCreated {
    pub id: Ulid,
    pub title: String,
    pub chunk_count: u32,
    pub uploaded_at: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn create_note(
    State(state): State<AppState>,
    client: ClientKey,
    body: Result<Json<NoteBody>, JsonRejection>,
) -> Result<(StatusCode, Json<NoteCreated>), AppError> {
    state.limiter.admit(&client.rate_key()).into_result()?;
    let Json(body) = body?;

    let document = state
        .orchestrator
        .ingest(IngestRequest {
            text: body.text,
            title: body.title,
            content_type: body.content_type,
            metadata: body.metadata,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(NoteCreated {
            id: document.id,
            title: document.title,
            chunk_count: document.chunk_count,
            uploaded_at: document.uploaded_at,
        }),
    ))
}

pub async fn list_documents(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<Document>>, AppError> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = params.offset.unwrap_or(0);

    let documents = state.orchestrator.list_documents(limit, offset).await?;
    Ok(Json(documents))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let id = parse_id(&id, |id| RagError::DocumentNotFound { id })?;
    let document = state.orchestrator.get_document(id).await?;
    Ok(Json(document))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id, |id| RagError::DocumentNotFound { id })?;
    state.orchestrator.delete_document(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
