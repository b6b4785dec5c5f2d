//! Route table and shared handler helpers.

pub mod chat;
pub mod documents;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use rag_core::{RagError, MAX_BLOB_BYTES};

use crate::state::AppState;

pub const MODEL_USED_HEADER: &str = "x-model-used";
pub const SOURCES_COUNT_HEADER: &str = "x-sources-count";

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let enable_cors = state.config.server.enable_cors;

    let app = Router::new()
        .route("/", get(chat::ask))
        .route("/health", get(health))
        .route("/notes", post(documents::create_note))
        .route("/documents", get(documents::list_documents))
        .route(
            "/documents/{id}",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/chat/conversations", post(chat::create_conversation))
        .route(
            "/chat/conversations/{id}",
            get(chat::get_conversation).delete(chat::delete_conversation),
        )
        .route("/chat/conversations/{id}/messages", post(chat::post_message))
        .layer(DefaultBodyLimit::max(MAX_BLOB_BYTES))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app.layer(cors)
    } else {
        app
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// A malformed id cannot name anything, so it reads as not found.
pub(crate) fn parse_id(raw: &str, not_found: impl FnOnce(String) -> RagError) -> Result<Ulid, RagError> {
    raw.parse::<Ulid>().map_err(|_| not_found(raw.to_string()))
}

/// `x-model-used` and `x-sources-count` for an answer.
pub(crate) fn answer_headers(model: &str, sources: usize) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(MODEL_USED_HEADER),
        HeaderValue::from_str(model).unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    );
    headers.insert(
        HeaderName::from_static(SOURCES_COUNT_HEADER),
        HeaderValue::from(sources),
    );
    headers
}
