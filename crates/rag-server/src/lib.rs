//! rag-server - HTTP surface for the chat service
//!
//! An axum router over [`rag_chat::ChatOrchestrator`]:
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `POST` | `/notes` | Ingest a text document |
//! | `GET` | `/documents` | List documents |
//! | `GET`, `DELETE` | `/documents/{id}` | Read or delete a document |
//! | `POST` | `/chat/conversations` | Start a conversation |
//! | `GET`, `DELETE` | `/chat/conversations/{id}` | Transcript or delete |
//! | `POST` | `/chat/conversations/{id}/messages` | Run a chat turn |
//! | `GET` | `/?text=` | Ask one question, plain text answer |
//! | `GET` | `/health` | Liveness |

pub mod client;
pub mod error;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tracing::{debug, info};

use rag_chat::RateLimiter;
use rag_core::{RagError, Result};

pub use client::ClientKey;
pub use error::AppError;
pub use routes::{MODEL_USED_HEADER, SOURCES_COUNT_HEADER};
pub use state::{build_services, check_dimensions, AppState};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Build the application router.
pub fn build_app(state: AppState) -> Router {
    routes::router(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.server.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RagError::config(format!("Failed to bind {}: {}", addr, e)))?;

    info!("Listening on http://{}", addr);
    info!(
        "Generation via {} ({})",
        state.orchestrator.gateway().provider(),
        state.orchestrator.gateway().model()
    );

    spawn_pruner(state.limiter.clone());

    let app = build_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| RagError::internal(format!("Server error: {}", e)))?;

    info!("Server stopped");
    Ok(())
}

fn spawn_pruner(limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            limiter.prune();
            debug!("Rate limiter tracking {} keys", limiter.tracked_keys());
        }
    });
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
