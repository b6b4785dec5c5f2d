//! In-memory [`Store`], [`BlobStore`] and [`VectorIndex`] implementations.
//!
//! Used by tests and by `rag serve --ephemeral`. Vector search is brute-force
//! cosine similarity over all stored vectors.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use ulid::Ulid;

use rag_core::{
    unix_millis, BlobStore, Conversation, Document, Message, Metadata, NewDocument, NewMessage,
    Note, RagError, Result, RetrievalMatch, Store, VectorIndex, VectorRecord, MAX_BLOB_BYTES,
};

use crate::cosine_similarity;

#[derive(Default)]
struct Tables {
    /// Documents with their insertion sequence.
    documents: HashMap<Ulid, (u64, Document)>,
    notes: HashMap<Ulid, Note>,
    conversations: HashMap<Ulid, Conversation>,
    /// Insertion order doubles as the tie-break sequence.
    messages: Vec<Message>,
    blobs: HashMap<String, (Vec<u8>, Metadata)>,
    next_seq: u64,
}

/// In-memory relational and blob store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    /// Last timestamp handed out; never goes backwards.
    clock: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now(&self) -> u64 {
        let mut last = self.clock.lock();
        *last = (*last).max(unix_millis());
        *last
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_document(&self, doc: NewDocument) -> Result<Document> {
        let uploaded_at = self.now();
        let mut tables = self.tables.write();
        if tables.documents.contains_key(&doc.id) {
            return Err(RagError::database(format!("duplicate document id {}", doc.id)));
        }

        let document = Document {
            id: doc.id,
            title: doc.title,
            content_type: doc.content_type,
            uploaded_at,
            chunk_count: 0,
            metadata: doc.metadata,
        };
        let seq = tables.next_seq;
        tables.next_seq += 1;
        tables.documents.insert(document.id, (seq, document.clone()));
        Ok(document)
    }

    async fn get_document(&self, id: Ulid) -> Result<Option<Document>> {
        Ok(self.tables.read().documents.get(&id).map(|(_, d)| d.clone()))
    }

    async fn list_documents(&self, limit: u32, offset: u32) -> Result<Vec<Document>> {
        let tables = self.tables.read();
        let mut docs: Vec<&(u64, Document)> = tables.documents.values().collect();
        docs.sort_by(|a, b| {
            b.1.uploaded_at
                .cmp(&a.1.uploaded_at)
                .then_with(|| b.0.cmp(&a.0))
        });
        Ok(docs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn set_chunk_count(&self, id: Ulid, chunk_count: u32) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.documents.get_mut(&id) {
            Some((_, doc)) => {
                doc.chunk_count = chunk_count;
                Ok(())
            }
            None => Err(RagError::DocumentNotFound { id: id.to_string() }),
        }
    }

    async fn delete_document(&self, id: Ulid) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.documents.remove(&id).is_none() {
            return Err(RagError::DocumentNotFound { id: id.to_string() });
        }
        tables.notes.retain(|_, n| n.document_id != Some(id));
        Ok(())
    }

    async fn insert_notes(&self, notes: &[Note]) -> Result<()> {
        let mut tables = self.tables.write();
        for note in notes {
            if let Some(doc_id) = note.document_id {
                if !tables.documents.contains_key(&doc_id) {
                    return Err(RagError::database(format!(
                        "note {} references missing document {}",
                        note.id, doc_id
                    )));
                }
            }
            if tables.notes.contains_key(&note.id) {
                return Err(RagError::database(format!("duplicate note id {}", note.id)));
            }
        }
        for note in notes {
            tables.notes.insert(note.id, note.clone());
        }
        Ok(())
    }

    async fn get_notes(&self, ids: &[Ulid]) -> Result<Vec<Note>> {
        let tables = self.tables.read();
        Ok(ids.iter().filter_map(|id| tables.notes.get(id).cloned()).collect())
    }

    async fn notes_for_document(&self, doc_id: Ulid) -> Result<Vec<Note>> {
        let tables = self.tables.read();
        let mut notes: Vec<Note> = tables
            .notes
            .values()
            .filter(|n| n.document_id == Some(doc_id))
            .cloned()
            .collect();
        notes.sort_by_key(|n| n.chunk_index);
        Ok(notes)
    }

    async fn create_conversation(&self) -> Result<Conversation> {
        let conversation = Conversation {
            id: Ulid::new(),
            created_at: self.now(),
        };
        self.tables
            .write()
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Ulid) -> Result<Option<Conversation>> {
        Ok(self.tables.read().conversations.get(&id).cloned())
    }

    async fn delete_conversation(&self, id: Ulid) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.conversations.remove(&id).is_none() {
            return Err(RagError::ConversationNotFound { id: id.to_string() });
        }
        tables.messages.retain(|m| m.conversation_id != id);
        Ok(())
    }

    async fn insert_message(&self, msg: NewMessage) -> Result<Message> {
        let created_at = self.now();
        let mut tables = self.tables.write();
        if !tables.conversations.contains_key(&msg.conversation_id) {
            return Err(RagError::ConversationNotFound {
                id: msg.conversation_id.to_string(),
            });
        }

        let message = Message {
            id: msg.id,
            conversation_id: msg.conversation_id,
            role: msg.role,
            content: msg.content,
            sources: msg.sources,
            created_at,
            archived: false,
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, conversation_id: Ulid) -> Result<Vec<Message>> {
        let tables = self.tables.read();
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        // stable: equal timestamps keep insertion order
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn archive_messages(&self, conversation_id: Ulid, ids: &[Ulid]) -> Result<()> {
        let mut tables = self.tables.write();
        for message in tables
            .messages
            .iter_mut()
            .filter(|m| m.conversation_id == conversation_id && ids.contains(&m.id))
        {
            message.archived = true;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tables.read().blobs.get(key).map(|(v, _)| v.clone()))
    }

    async fn put(&self, key: &str, value: &[u8], metadata: &Metadata) -> Result<()> {
        if value.len() > MAX_BLOB_BYTES {
            return Err(RagError::PayloadTooLarge {
                size: value.len(),
                limit: MAX_BLOB_BYTES,
            });
        }
        self.tables
            .write()
            .blobs
            .insert(key.to_string(), (value.to_vec(), metadata.clone()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.tables.write().blobs.remove(key);
        Ok(())
    }
}

/// In-memory vector index with a fixed dimension.
pub struct MemoryVectorIndex {
    dimension: usize,
    vectors: RwLock<HashMap<Ulid, VectorRecord>>,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: Ulid) -> bool {
        self.vectors.read().contains_key(&id)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievalMatch>> {
        if vector.len() != self.dimension {
            return Err(RagError::retrieval(format!(
                "query vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let vectors = self.vectors.read();
        let mut matches: Vec<RetrievalMatch> = vectors
            .values()
            .map(|r| RetrievalMatch {
                id: r.id,
                score: cosine_similarity(vector, &r.embedding),
                metadata: Some(r.metadata),
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != self.dimension) {
            return Err(RagError::embedding(format!(
                "vector {} has dimension {}, index expects {}",
                bad.id,
                bad.embedding.len(),
                self.dimension
            )));
        }
        let mut vectors = self.vectors.write();
        for record in records {
            vectors.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[Ulid]) -> Result<()> {
        let mut vectors = self.vectors.write();
        for id in ids {
            vectors.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_keep_insertion_order() {
        let store = MemoryStore::new();
        let conv = store.create_conversation().await.unwrap();

        let mut ids = Vec::new();
        for i in 0..20 {
            let msg = store
                .insert_message(NewMessage::user(conv.id, &format!("m{}", i)))
                .await
                .unwrap();
            ids.push(msg.id);
        }

        let listed: Vec<Ulid> = store
            .list_messages(conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let store = MemoryStore::new();
        let conv = store.create_conversation().await.unwrap();
        let a = store
            .insert_message(NewMessage::user(conv.id, "a"))
            .await
            .unwrap();
        let b = store
            .insert_message(NewMessage::user(conv.id, "b"))
            .await
            .unwrap();
        assert!(b.created_at >= a.created_at);
        assert!(a.created_at >= conv.created_at);
    }

    #[tokio::test]
    async fn test_delete_document_cascades_notes() {
        let store = MemoryStore::new();
        let doc = store
            .insert_document(NewDocument::new("t", "text/plain", Metadata::new()))
            .await
            .unwrap();
        let note = Note::new(Some(doc.id), 0, "x");
        store.insert_notes(&[note.clone()]).await.unwrap();

        store.delete_document(doc.id).await.unwrap();
        assert!(store.get_notes(&[note.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notes_require_document() {
        let store = MemoryStore::new();
        let note = Note::new(Some(Ulid::new()), 0, "x");
        assert!(store.insert_notes(&[note]).await.is_err());
    }

    #[tokio::test]
    async fn test_message_requires_conversation() {
        let store = MemoryStore::new();
        let err = store
            .insert_message(NewMessage::user(Ulid::new(), "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ConversationNotFound { .. }));
    }

    #[tokio::test]
    async fn test_vector_index_query_and_delete() {
        let index = MemoryVectorIndex::new(2);
        let a = Note::new(None, 0, "a");
        let b = Note::new(None, 1, "b");
        index
            .upsert(&[
                VectorRecord::for_note(&a, vec![1.0, 0.0]),
                VectorRecord::for_note(&b, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let matches = index.query(&[0.9, 0.1], 1).await.unwrap();
        assert_eq!(matches[0].id, a.id);

        index.delete_by_ids(&[a.id]).await.unwrap();
        assert!(!index.contains(a.id));
        assert_eq!(index.len(), 1);

        assert!(index.query(&[1.0, 0.0, 0.0], 1).await.is_err());
        assert!(index
            .upsert(&[VectorRecord::for_note(&a, vec![1.0])])
            .await
            .is_err());
    }
}
