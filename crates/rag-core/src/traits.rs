//! Core traits defining the interfaces between components.

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::Result;
use crate::types::{
    ComposedPrompt, Conversation, Document, Message, NewDocument, NewMessage, Note, PromptShape,
    RetrievalMatch, VectorRecord,
};

/// Relational storage for documents, notes, conversations and messages.
///
/// Timestamps (`uploaded_at`, `created_at`) are always assigned by the
/// implementation and returned to the caller; callers never supply them.
#[async_trait]
pub trait Store: Send + Sync {
    // Document operations
    async fn insert_document(&self, doc: NewDocument) -> Result<Document>;
    async fn get_document(&self, id: Ulid) -> Result<Option<Document>>;
    async fn list_documents(&self, limit: u32, offset: u32) -> Result<Vec<Document>>;
    async fn set_chunk_count(&self, id: Ulid, chunk_count: u32) -> Result<()>;
    /// Deletes the document and, by cascade, its notes.
    async fn delete_document(&self, id: Ulid) -> Result<()>;

    // Note operations
    async fn insert_notes(&self, notes: &[Note]) -> Result<()>;
    async fn get_notes(&self, ids: &[Ulid]) -> Result<Vec<Note>>;
    async fn notes_for_document(&self, doc_id: Ulid) -> Result<Vec<Note>>;

    // Conversation operations
    async fn create_conversation(&self) -> Result<Conversation>;
    async fn get_conversation(&self, id: Ulid) -> Result<Option<Conversation>>;
    /// Deletes the conversation and, by cascade, its messages.
    async fn delete_conversation(&self, id: Ulid) -> Result<()>;

    // Message operations
    async fn insert_message(&self, msg: NewMessage) -> Result<Message>;
    /// All messages of a conversation ordered by `created_at`, then insertion order.
    async fn list_messages(&self, conversation_id: Ulid) -> Result<Vec<Message>>;
    async fn archive_messages(&self, conversation_id: Ulid, ids: &[Ulid]) -> Result<()>;
}

/// Key-value storage for full document content.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: &[u8], metadata: &crate::types::Metadata) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Blob key holding a document's full content.
pub fn document_blob_key(id: Ulid) -> String {
    format!("doc:{}", id)
}

/// Nearest-neighbour index over note embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension fixed when the index was created.
    fn dimension(&self) -> usize;

    /// Top `k` matches by cosine similarity, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievalMatch>>;

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    async fn delete_by_ids(&self, ids: &[Ulid]) -> Result<()>;
}

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. Returns one vector per input, in order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

/// Text generation provider.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider name, used as the circuit breaker key.
    fn provider(&self) -> &str;

    /// Model identifier reported to clients.
    fn model(&self) -> &str;

    /// Message layout this provider expects.
    fn shape(&self) -> PromptShape;

    async fn generate(&self, prompt: &ComposedPrompt) -> Result<String>;
}

/// Chunking configuration.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,

    /// Characters repeated between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

/// Chunking strategy trait.
pub trait Chunker: Send + Sync {
    /// Split text into chunks.
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>>;
}

/// Raw chunk data before ID assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    /// Chunk text content.
    pub content: String,

    /// Position of the chunk in the source (0-based).
    pub index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_blob_key() {
        let id = Ulid::nil();
        assert_eq!(document_blob_key(id), format!("doc:{}", id));
    }
}
