//! Shared HTTP plumbing for generation providers.

use std::time::Duration;

use reqwest::StatusCode;

use rag_core::{RagError, Result};

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))
}

/// Rate limiting and server errors are worth retrying; other client errors are not.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> RagError {
    let message = format!("{} returned {}: {}", provider, status, truncate(body, 300));
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RagError::transient(message)
    } else {
        RagError::generation(message)
    }
}

/// Connection failures and timeouts are transient.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> RagError {
    RagError::transient(format!("{} request failed: {}", provider, err))
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
