//! rag-chat - The retrieval-augmented chat pipeline
//!
//! Everything between an HTTP request and the collaborators: input
//! sanitizing, conversation memory, prompt composition, citation checking,
//! admission control and the orchestrator that sequences a turn.
//!
//! # Turn flow
//!
//! ```text
//! RateLimiter -> Sanitizer -> ConversationMemory.persist_user_turn
//!   -> Embedder -> VectorRetriever -> ContextBuilder
//!   -> ConversationMemory.apply_window -> compose -> ModelGateway
//!   -> CitationValidator -> ConversationMemory.persist
//! ```

pub mod citation;
pub mod locks;
pub mod memory;
pub mod orchestrator;
pub mod prompt;
pub mod rate_limit;
pub mod sanitize;

pub use citation::{select_sources, CheckedAnswer, CitationValidator};
pub use locks::ConversationLocks;
pub use memory::{estimate_tokens, ConversationMemory, GatewaySummarizer, Summarizer};
pub use orchestrator::{
    ChatOrchestrator, ChatReply, IngestRequest, Services, GUARD_MODEL, GUARD_MODE_ANSWER,
};
pub use prompt::{compose, system_prompt};
pub use rate_limit::{Admission, RateLimiter};
pub use sanitize::{clean, InputKind, Sanitized, Sanitizer};
