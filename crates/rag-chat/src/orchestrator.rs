//! Control flow for chat turns, single-shot questions, ingestion and deletion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use rag_core::{
    document_blob_key, unix_millis, BlobStore, ChunkConfig, Chunker, Conversation, Document,
    Embedder, Message, Metadata, NewDocument, NewMessage, Note, RagConfig, RagError, Result, Role,
    Source, Store, VectorIndex, VectorRecord,
};
use rag_embed::embed_checked;
use rag_llm::ModelGateway;
use rag_query::{ContextBuilder, VectorRetriever};

use crate::citation::{select_sources, CitationValidator};
use crate::locks::ConversationLocks;
use crate::memory::{ConversationMemory, GatewaySummarizer, Summarizer};
use crate::prompt::compose;
use crate::sanitize::{validate_content_type, validate_title, Sanitized, Sanitizer};

/// Answer given when nothing relevant was retrieved. No model is called.
pub const GUARD_MODE_ANSWER: &str = "I couldn't find anything in the uploaded documents that answers this question. Try rephrasing it, or upload a document that covers the topic.";

/// Model name reported for guard-mode answers.
pub const GUARD_MODEL: &str = "none";

/// Collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub chunker: Arc<dyn Chunker>,
    pub gateway: Arc<ModelGateway>,
}

/// A document to ingest.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub text: String,
    pub title: Option<String>,
    pub content_type: Option<String>,
    pub metadata: Option<Metadata>,
}

/// The assistant's answer to one turn or question.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,
    /// Retrieved sources the answer validly cites.
    pub sources: Vec<Source>,
    pub model: String,
    pub guard_mode: bool,
    pub fallback: bool,
}

pub struct ChatOrchestrator {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunker: Arc<dyn Chunker>,
    gateway: Arc<ModelGateway>,
    sanitizer: Sanitizer,
    citations: Arc<CitationValidator>,
    retriever: VectorRetriever,
    context: ContextBuilder,
    memory: ConversationMemory,
    summarizer: Arc<dyn Summarizer>,
    locks: ConversationLocks,
    chunk_config: ChunkConfig,
    batch_size: usize,
    concurrency: usize,
}

impl ChatOrchestrator {
    pub fn new(config: &RagConfig, services: Services) -> Result<Self> {
        let citations = Arc::new(CitationValidator::new()?);

        Ok(Self {
            sanitizer: Sanitizer::new(&config.validation)?,
            retriever: VectorRetriever::new(
                services.index.clone(),
                config.retrieval.for_provider(&config.embedding.provider),
            ),
            context: ContextBuilder::new(services.store.clone(), config.retrieval.preview_chars),
            memory: ConversationMemory::new(
                services.store.clone(),
                config.memory.clone(),
                citations.clone(),
            ),
            summarizer: Arc::new(GatewaySummarizer::new(services.gateway.clone())),
            locks: ConversationLocks::new(Duration::from_millis(config.memory.lock_timeout_ms)),
            chunk_config: ChunkConfig {
                chunk_size: config.chunking.chunk_size,
                chunk_overlap: config.chunking.chunk_overlap,
            },
            batch_size: config.embedding.batch_size.max(1),
            concurrency: config.embedding.concurrency.max(1),
            citations,
            store: services.store,
            blobs: services.blobs,
            index: services.index,
            embedder: services.embedder,
            chunker: services.chunker,
            gateway: services.gateway,
        })
    }

    pub fn gateway(&self) -> &Arc<ModelGateway> {
        &self.gateway
    }

    // Conversations

    pub async fn create_conversation(&self) -> Result<Conversation> {
        let conversation = self.store.create_conversation().await?;
        info!("Created conversation {}", conversation.id);
        Ok(conversation)
    }

    /// The conversation's transcript: user and assistant messages in order,
    /// including those folded into a summary.
    pub async fn conversation_messages(&self, id: Ulid) -> Result<Vec<Message>> {
        self.require_conversation(id).await?;
        let messages = self.memory.load_history(id).await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.role != Role::SystemSummary)
            .collect())
    }

    pub async fn delete_conversation(&self, id: Ulid) -> Result<()> {
        self.require_conversation(id).await?;
        self.store.delete_conversation(id).await?;
        self.locks.remove(id);
        info!("Deleted conversation {}", id);
        Ok(())
    }

    async fn require_conversation(&self, id: Ulid) -> Result<Conversation> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(|| RagError::ConversationNotFound { id: id.to_string() })
    }

    /// Run one chat turn. The turn runs on its own task so that a caller
    /// going away does not interrupt persistence.
    pub async fn send_message(self: &Arc<Self>, conversation_id: Ulid, raw: &str) -> Result<ChatReply> {
        let this = Arc::clone(self);
        let raw = raw.to_string();
        tokio::spawn(async move { this.run_turn(conversation_id, &raw).await })
            .await
            .map_err(|e| RagError::internal(format!("chat turn task failed: {}", e)))?
    }

    async fn run_turn(&self, conversation_id: Ulid, raw: &str) -> Result<ChatReply> {
        let start = Instant::now();
        let question = self.sanitizer.validate_message(raw)?;

        let _turn = self.locks.acquire(conversation_id).await?;
        self.require_conversation(conversation_id).await?;

        let user = self
            .memory
            .persist_user_turn(conversation_id, &question.text)
            .await?;
        debug!("User message {} in conversation {}", user.id, conversation_id);

        // the prompt is built from the persisted read-back, never from the request
        let history = self.memory.load_history(conversation_id).await?;
        let reply = self.answer(&question, Some((conversation_id, history))).await?;

        let stored_sources = (!reply.sources.is_empty()).then(|| reply.sources.clone());
        if let Err(e) = self
            .memory
            .persist(NewMessage::assistant(
                conversation_id,
                &reply.content,
                stored_sources,
            ))
            .await
        {
            error!(
                "Assistant reply for conversation {} was not persisted: {}",
                conversation_id, e
            );
        }

        info!(
            "Turn in {} answered by {} with {} sources in {:?}",
            conversation_id,
            reply.model,
            reply.sources.len(),
            start.elapsed()
        );
        Ok(reply)
    }

    /// Answer a question without conversation memory.
    pub async fn ask(&self, raw: &str) -> Result<ChatReply> {
        let question = self.sanitizer.validate_message(raw)?;
        self.answer(&question, None).await
    }

    async fn answer(
        &self,
        question: &Sanitized,
        conversation: Option<(Ulid, Vec<Message>)>,
    ) -> Result<ChatReply> {
        let mut vectors = embed_checked(self.embedder.as_ref(), &[question.text.as_str()]).await?;
        let query = vectors
            .pop()
            .ok_or_else(|| RagError::embedding("no vector for the query"))?;

        let retrieval = self.retriever.retrieve(&query).await;
        if retrieval.guard_mode {
            return Ok(guard_reply());
        }

        let context = self.context.build(&retrieval.matches).await?;
        if context.sources.is_empty() {
            debug!("All retrieved notes are gone, answering in guard mode");
            return Ok(guard_reply());
        }

        let window = match conversation {
            Some((id, history)) => {
                self.memory
                    .apply_window(id, history, self.summarizer.as_ref())
                    .await
            }
            None => vec![transient_user_message(&question.text)],
        };

        let prompt = compose(
            &context.context_block,
            &window,
            question.injection_flagged,
            self.gateway.shape(),
        );
        let outcome = self.gateway.generate(&prompt, &context.sources).await;

        let checked = self
            .citations
            .validate(&outcome.text, &context.source_ids());

        Ok(ChatReply {
            content: checked.text,
            sources: select_sources(&context.sources, &checked.valid_ids),
            model: outcome.model,
            guard_mode: false,
            fallback: outcome.fallback,
        })
    }

    // Documents

    /// Validate, store, chunk and index a document.
    pub async fn ingest(&self, request: IngestRequest) -> Result<Document> {
        let start = Instant::now();
        let content = self.sanitizer.validate_document(&request.text)?;
        let title = validate_title(request.title.as_deref())?;
        let content_type = validate_content_type(request.content_type.as_deref())?;
        let chunks = self.chunker.chunk(&content.text, &self.chunk_config)?;
        if content.injection_flagged {
            warn!("Document {:?} contains instruction-like text", title);
        }

        let doc = self
            .store
            .insert_document(NewDocument::new(
                &title,
                &content_type,
                request.metadata.unwrap_or_default(),
            ))
            .await?;

        if let Err(e) = self
            .blobs
            .put(&document_blob_key(doc.id), content.text.as_bytes(), &doc.metadata)
            .await
        {
            self.discard_document(doc.id).await;
            return Err(e);
        }

        let notes: Vec<Note> = chunks
            .iter()
            .map(|c| Note::new(Some(doc.id), c.index, &c.content))
            .collect();

        let embedder = self.embedder.as_ref();
        let results: Vec<(&[Note], Result<Vec<Vec<f32>>>)> =
            stream::iter(
                notes
                    .chunks(self.batch_size)
                    .map(|batch| {
                        async move {
                            let texts: Vec<&str> =
                                batch.iter().map(|n| n.text.as_str()).collect();
                            (batch, embed_checked(embedder, &texts).await)
                        }
                        .boxed()
                    })
                    .collect::<Vec<_>>(),
            )
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut records = Vec::with_capacity(notes.len());
        let mut embedded = Vec::with_capacity(notes.len());
        let mut last_error = None;
        for (batch, result) in results {
            match result {
                Ok(vectors) => {
                    for (note, vector) in batch.iter().zip(vectors) {
                        records.push(VectorRecord::for_note(note, vector));
                        embedded.push(note.clone());
                    }
                }
                Err(e) => {
                    warn!(
                        "Skipping {} chunks of document {}: {}",
                        batch.len(),
                        doc.id,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        if embedded.is_empty() {
            self.discard_document(doc.id).await;
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no chunks".to_string());
            return Err(RagError::embedding(format!(
                "no chunk of the document could be embedded: {}",
                reason
            )));
        }
        embedded.sort_by_key(|n| n.chunk_index);

        if let Err(e) = self.index.upsert(&records).await {
            self.discard_document(doc.id).await;
            return Err(e);
        }
        if let Err(e) = self.store.insert_notes(&embedded).await {
            let ids: Vec<Ulid> = embedded.iter().map(|n| n.id).collect();
            if let Err(cleanup) = self.index.delete_by_ids(&ids).await {
                error!("Failed to remove vectors of document {}: {}", doc.id, cleanup);
            }
            self.discard_document(doc.id).await;
            return Err(e);
        }

        let chunk_count = embedded.len() as u32;
        self.store.set_chunk_count(doc.id, chunk_count).await?;

        info!(
            "Ingested document {} ({} of {} chunks) in {:?}",
            doc.id,
            chunk_count,
            notes.len(),
            start.elapsed()
        );
        Ok(Document { chunk_count, ..doc })
    }

    /// Remove a half-ingested document and its blob.
    async fn discard_document(&self, id: Ulid) {
        if let Err(e) = self.store.delete_document(id).await {
            error!("Failed to roll back document {}: {}", id, e);
        }
        if let Err(e) = self.blobs.delete(&document_blob_key(id)).await {
            error!("Failed to remove blob of document {}: {}", id, e);
        }
    }

    pub async fn list_documents(&self, limit: u32, offset: u32) -> Result<Vec<Document>> {
        self.store.list_documents(limit, offset).await
    }

    pub async fn get_document(&self, id: Ulid) -> Result<Document> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| RagError::DocumentNotFound { id: id.to_string() })
    }

    /// Delete a document, its notes, their vectors and its blob.
    ///
    /// Every step is attempted; a failed step is reported as a
    /// persistence failure after the others ran.
    pub async fn delete_document(&self, id: Ulid) -> Result<()> {
        self.get_document(id).await?;
        let note_ids: Vec<Ulid> = self
            .store
            .notes_for_document(id)
            .await?
            .iter()
            .map(|n| n.id)
            .collect();

        let mut failures = Vec::new();
        if !note_ids.is_empty() {
            if let Err(e) = self.index.delete_by_ids(&note_ids).await {
                error!("Failed to delete vectors of document {}: {}", id, e);
                failures.push(format!("vectors: {}", e));
            }
        }
        if let Err(e) = self.store.delete_document(id).await {
            error!("Failed to delete document {}: {}", id, e);
            failures.push(format!("rows: {}", e));
        }
        if let Err(e) = self.blobs.delete(&document_blob_key(id)).await {
            error!("Failed to delete blob of document {}: {}", id, e);
            failures.push(format!("blob: {}", e));
        }

        if !failures.is_empty() {
            return Err(RagError::database(format!(
                "document {} was only partly deleted ({})",
                id,
                failures.join("; ")
            )));
        }

        info!("Deleted document {} and {} notes", id, note_ids.len());
        Ok(())
    }
}

fn guard_reply() -> ChatReply {
    ChatReply {
        content: GUARD_MODE_ANSWER.to_string(),
        sources: Vec::new(),
        model: GUARD_MODEL.to_string(),
        guard_mode: true,
        fallback: false,
    }
}

fn transient_user_message(text: &str) -> Message {
    Message {
        id: Ulid::new(),
        conversation_id: Ulid::nil(),
        role: Role::User,
        content: text.to_string(),
        sources: None,
        created_at: unix_millis(),
        archived: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rag_chunk::RecursiveChunker;
    use rag_core::{ComposedPrompt, Generator, PromptShape, TurnRole};
    use rag_embed::HashingEmbedder;
    use rag_llm::{BreakerConfig, BreakerRegistry, RetryPolicy};
    use rag_store::{MemoryStore, MemoryVectorIndex};

    /// Generator answering with a fixed text and recording every prompt.
    struct EchoGenerator {
        answer: Mutex<String>,
        prompts: Mutex<Vec<ComposedPrompt>>,
    }

    impl EchoGenerator {
        fn new(answer: &str) -> Self {
            Self {
                answer: Mutex::new(answer.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        fn provider(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        fn shape(&self) -> PromptShape {
            PromptShape::Anthropic
        }

        async fn generate(&self, prompt: &ComposedPrompt) -> Result<String> {
            self.prompts.lock().push(prompt.clone());
            let answer = self.answer.lock().clone();
            // cite every id offered in the context, plus one that was not
            let ids: Vec<String> = prompt
                .system_prompt
                .split("id=")
                .skip(1)
                .filter_map(|s| s.split([')', ',']).next())
                .map(|s| format!("[source: {}]", s))
                .collect();
            Ok(format!("{} {} [source: INVENTED]", answer, ids.join(" ")))
        }
    }

    /// Embedder that always fails.
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Err(RagError::embedding("provider down"))
        }

        fn dimension(&self) -> usize {
            64
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    struct Fixture {
        orchestrator: Arc<ChatOrchestrator>,
        store: Arc<MemoryStore>,
        index: Arc<MemoryVectorIndex>,
        generator: Arc<EchoGenerator>,
    }

    fn fixture_with(embedder: Arc<dyn Embedder>) -> Fixture {
        let config = RagConfig::default();
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryVectorIndex::new(embedder.dimension()));
        let generator = Arc::new(EchoGenerator::new("Dogs are mammals."));
        let gateway = Arc::new(ModelGateway::new(
            generator.clone(),
            Arc::new(BreakerRegistry::new(BreakerConfig::from(&config.resilience))),
            RetryPolicy::new(0, Duration::from_millis(1)),
            Duration::from_secs(5),
        ));

        let orchestrator = ChatOrchestrator::new(
            &config,
            Services {
                store: store.clone(),
                blobs: store.clone(),
                index: index.clone(),
                embedder,
                chunker: Arc::new(RecursiveChunker::new()),
                gateway,
            },
        )
        .unwrap();

        Fixture {
            orchestrator: Arc::new(orchestrator),
            store,
            index,
            generator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(HashingEmbedder::new(768).unwrap()))
    }

    fn document(text: &str) -> IngestRequest {
        IngestRequest {
            text: text.to_string(),
            title: Some("Animals".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_turn_answers_with_valid_citations_only() {
        let f = fixture();
        let doc = f
            .orchestrator
            .ingest(document("Dogs are mammals."))
            .await
            .unwrap();
        assert_eq!(doc.chunk_count, 1);
        let note_id = f.store.notes_for_document(doc.id).await.unwrap()[0].id.to_string();

        let conv = f.orchestrator.create_conversation().await.unwrap();
        let reply = f
            .orchestrator
            .send_message(conv.id, "What is a dog?")
            .await
            .unwrap();

        assert!(!reply.guard_mode);
        assert_eq!(reply.model, "echo-1");
        assert!(reply.content.contains("mammals"));
        assert!(!reply.content.contains("INVENTED"));
        assert!(reply.content.contains("_Note: 1 invalid citation(s) were removed._"));
        assert_eq!(reply.sources.len(), 1);
        assert_eq!(reply.sources[0].id, note_id);

        let messages = f.orchestrator.conversation_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].sources.as_ref().unwrap()[0].id, note_id);
    }

    #[tokio::test]
    async fn test_cats_and_dogs_document_answers_dog_question() {
        let f = fixture();
        let doc = f
            .orchestrator
            .ingest(document("Cats are mammals. Dogs are mammals."))
            .await
            .unwrap();
        assert_eq!(doc.chunk_count, 1);
        let note_id = f.store.notes_for_document(doc.id).await.unwrap()[0].id.to_string();

        let conv = f.orchestrator.create_conversation().await.unwrap();
        let reply = f
            .orchestrator
            .send_message(conv.id, "What is a dog?")
            .await
            .unwrap();

        assert!(!reply.guard_mode);
        assert!(reply.content.contains("mammals"));
        assert!(reply.content.contains(&format!("[source: {}]", note_id)));
        assert_eq!(reply.sources.len(), 1);
        assert_eq!(reply.sources[0].id, note_id);
    }

    #[tokio::test]
    async fn test_current_message_sent_once() {
        let f = fixture();
        f.orchestrator
            .ingest(document("Dogs are mammals."))
            .await
            .unwrap();
        let conv = f.orchestrator.create_conversation().await.unwrap();
        f.orchestrator
            .send_message(conv.id, "What is a dog?")
            .await
            .unwrap();

        let prompts = f.generator.prompts.lock();
        let turns = &prompts[0].messages;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].content, "What is a dog?");
    }

    #[tokio::test]
    async fn test_empty_index_answers_in_guard_mode() {
        let f = fixture();
        let conv = f.orchestrator.create_conversation().await.unwrap();
        let reply = f
            .orchestrator
            .send_message(conv.id, "What is a dog?")
            .await
            .unwrap();

        assert!(reply.guard_mode);
        assert_eq!(reply.content, GUARD_MODE_ANSWER);
        assert!(reply.sources.is_empty());
        assert!(f.generator.prompts.lock().is_empty());

        let messages = f.orchestrator.conversation_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].sources.is_none());
    }

    #[tokio::test]
    async fn test_missing_conversation_is_not_found_without_writes() {
        let f = fixture();
        let id = Ulid::new();
        let err = f.orchestrator.send_message(id, "hello").await.unwrap_err();
        assert!(matches!(err, RagError::ConversationNotFound { .. }));
        assert!(f.store.list_messages(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_message_rejected_before_side_effects() {
        let f = fixture();
        let conv = f.orchestrator.create_conversation().await.unwrap();
        let err = f.orchestrator.send_message(conv.id, "   ").await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput { .. }));
        assert!(f.store.list_messages(conv.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parallel_turns_are_serialized() {
        let f = fixture();
        f.orchestrator
            .ingest(document("Dogs are mammals."))
            .await
            .unwrap();
        let conv = f.orchestrator.create_conversation().await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let orchestrator = f.orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator
                        .send_message(conv.id, &format!("Is dog number {} a mammal?", i))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let messages = f.orchestrator.conversation_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 20);
        for pair in messages.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
        let mut questions: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        questions.sort();
        questions.dedup();
        assert_eq!(questions.len(), 10);
    }

    #[tokio::test]
    async fn test_ask_does_not_touch_conversations() {
        let f = fixture();
        f.orchestrator
            .ingest(document("Dogs are mammals."))
            .await
            .unwrap();
        let reply = f.orchestrator.ask("What is a dog?").await.unwrap();
        assert!(!reply.guard_mode);
        assert_eq!(reply.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_stores_blob_and_vectors() {
        let f = fixture();
        let text = "Dogs are mammals.\n\n".repeat(120);
        let doc = f.orchestrator.ingest(document(&text)).await.unwrap();

        assert!(doc.chunk_count > 1);
        let notes = f.store.notes_for_document(doc.id).await.unwrap();
        assert_eq!(notes.len() as u32, doc.chunk_count);
        assert!(notes.iter().all(|n| f.index.contains(n.id)));

        let blob = f.store.get(&document_blob_key(doc.id)).await.unwrap().unwrap();
        assert!(String::from_utf8(blob).unwrap().starts_with("Dogs are mammals."));

        let stored = f.orchestrator.get_document(doc.id).await.unwrap();
        assert_eq!(stored.chunk_count, doc.chunk_count);
    }

    #[tokio::test]
    async fn test_ingest_rolls_back_when_nothing_embeds() {
        let f = fixture_with(Arc::new(BrokenEmbedder));
        let err = f
            .orchestrator
            .ingest(document("Dogs are mammals."))
            .await
            .unwrap_err();

        assert!(matches!(err, RagError::Embedding { .. }));
        assert!(f.orchestrator.list_documents(10, 0).await.unwrap().is_empty());
        assert!(f.index.is_empty());
    }

    #[tokio::test]
    async fn test_delete_document_leaves_nothing_queryable() {
        let f = fixture();
        let doc = f
            .orchestrator
            .ingest(document("Dogs are mammals."))
            .await
            .unwrap();

        f.orchestrator.delete_document(doc.id).await.unwrap();

        assert!(f.index.is_empty());
        assert!(f.store.get(&document_blob_key(doc.id)).await.unwrap().is_none());
        assert!(matches!(
            f.orchestrator.get_document(doc.id).await,
            Err(RagError::DocumentNotFound { .. })
        ));
        let reply = f.orchestrator.ask("What is a dog?").await.unwrap();
        assert!(reply.guard_mode);
    }

    #[tokio::test]
    async fn test_delete_conversation() {
        let f = fixture();
        let conv = f.orchestrator.create_conversation().await.unwrap();
        f.orchestrator.delete_conversation(conv.id).await.unwrap();
        assert!(matches!(
            f.orchestrator.conversation_messages(conv.id).await,
            Err(RagError::ConversationNotFound { .. })
        ));
    }
}
