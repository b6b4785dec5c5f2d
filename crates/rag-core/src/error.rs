//! Error types for the chat service.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Coarse classification of errors, used for propagation policy and for
/// mapping onto HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    PayloadTooLarge,
    NotFound,
    RateLimited,
    Conflict,
    EmbeddingFailure,
    RetrievalFailure,
    GenerationFailure,
    PersistenceFailure,
    Configuration,
    Internal,
}

/// Errors that can occur in the chat service.
#[derive(Error, Debug)]
pub enum RagError {
    /// Input failed validation.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Input exceeds the configured size limit.
    #[error("Payload too large: {size} exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Conversation not found.
    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    /// Document not found.
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    /// Admission control rejected the request.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Another turn holds the conversation for longer than the bounded wait.
    #[error("Conversation busy: {id}")]
    ConversationBusy { id: String },

    /// Embedding provider error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Vector index error.
    #[error("Retrieval error: {message}")]
    Retrieval { message: String },

    /// Generation provider error.
    #[error("Generation error: {message}")]
    Generation { message: String, transient: bool },

    /// The circuit breaker for a provider is open.
    #[error("Circuit open for provider: {provider}")]
    CircuitOpen { provider: String },

    /// Database or blob store error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a retrieval error.
    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval {
            message: message.into(),
        }
    }

    /// Create a generation error that is worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            transient: true,
        }
    }

    /// Create a generation error that will fail the same way on retry.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            transient: false,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Generation {
                transient: true,
                ..
            }
        )
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Self::ConversationNotFound { .. } | Self::DocumentNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ConversationBusy { .. } => ErrorKind::Conflict,
            Self::Embedding { .. } => ErrorKind::EmbeddingFailure,
            Self::Retrieval { .. } => ErrorKind::RetrievalFailure,
            Self::Generation { .. } | Self::CircuitOpen { .. } => ErrorKind::GenerationFailure,
            Self::Database { .. } | Self::Io(_) => ErrorKind::PersistenceFailure,
            Self::Config { .. } => ErrorKind::Configuration,
            Self::Serialization(_) | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get the stable error code used in API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            Self::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::ConversationBusy { .. } => "CONVERSATION_BUSY",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Retrieval { .. } => "RETRIEVAL_ERROR",
            Self::Generation { .. } => "GENERATION_ERROR",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagError::ConversationNotFound {
            id: "abc123".to_string(),
        };
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RagError::DocumentNotFound {
                id: "x".to_string()
            }
            .error_code(),
            "DOCUMENT_NOT_FOUND"
        );
        assert_eq!(RagError::database("test").error_code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(RagError::database("x").kind(), ErrorKind::PersistenceFailure);
        assert_eq!(
            RagError::RateLimited {
                retry_after_secs: 3
            }
            .kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            RagError::CircuitOpen {
                provider: "anthropic".into()
            }
            .kind(),
            ErrorKind::GenerationFailure
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(RagError::transient("timeout").is_transient());
        assert!(!RagError::generation("bad request").is_transient());
        assert!(!RagError::database("locked").is_transient());
    }
}
