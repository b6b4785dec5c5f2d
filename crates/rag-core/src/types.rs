//! Core domain types for the chat service.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Free-form JSON metadata attached to a document.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Current wall-clock time in Unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Parse a metadata blob. Malformed or non-object JSON yields an empty map.
pub fn parse_metadata(raw: &str) -> Metadata {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => Metadata::new(),
    }
}

/// A document in the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Human readable title.
    pub title: String,

    /// MIME-style content type supplied at ingestion.
    pub content_type: String,

    /// Upload timestamp assigned by the store (Unix millis).
    pub uploaded_at: u64,

    /// Number of notes (chunks) stored for this document.
    pub chunk_count: u32,

    /// User-provided metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Read a string metadata field, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// A document before the store has assigned its timestamp.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: Ulid,
    pub title: String,
    pub content_type: String,
    pub metadata: Metadata,
}

impl NewDocument {
    /// Create a new document with a fresh id.
    pub fn new(title: &str, content_type: &str, metadata: Metadata) -> Self {
        Self {
            id: Ulid::new(),
            title: title.to_string(),
            content_type: content_type.to_string(),
            metadata,
        }
    }
}

/// A chunk of a document. Its id doubles as the id of its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Unique identifier, shared with the vector record.
    pub id: Ulid,

    /// Parent document (absent for legacy notes).
    pub document_id: Option<Ulid>,

    /// Chunk text.
    pub text: String,

    /// Index within the document (0-based).
    pub chunk_index: u32,
}

impl Note {
    /// Create a new note with a fresh id.
    pub fn new(document_id: Option<Ulid>, chunk_index: u32, text: &str) -> Self {
        Self {
            id: Ulid::new(),
            document_id,
            text: text.to_string(),
            chunk_index,
        }
    }

    /// Metadata stored alongside this note's vector.
    pub fn vector_metadata(&self) -> VectorMetadata {
        VectorMetadata {
            document_id: self.document_id,
            note_id: self.id,
            chunk_index: self.chunk_index,
        }
    }
}

/// Metadata carried by a vector record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMetadata {
    pub document_id: Option<Ulid>,
    pub note_id: Ulid,
    pub chunk_index: u32,
}

/// An entry in the vector index.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Equal to the owning note's id.
    pub id: Ulid,
    pub embedding: Vec<f32>,
    pub metadata: VectorMetadata,
}

impl VectorRecord {
    /// Build the vector record for a note.
    pub fn for_note(note: &Note, embedding: Vec<f32>) -> Self {
        Self {
            id: note.id,
            embedding,
            metadata: note.vector_metadata(),
        }
    }
}

/// A nearest-neighbour match returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMatch {
    pub id: Ulid,
    /// Cosine similarity (higher is better).
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VectorMetadata>,
}

/// A chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Ulid,
    pub created_at: u64,
}

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "system-summary")]
    SystemSummary,
}

impl Role {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::SystemSummary => "system-summary",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system-summary" => Some(Self::SystemSummary),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved source as persisted on an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    /// Truncated preview of the chunk text.
    pub text: String,
}

impl Source {
    /// Parse a persisted sources blob. Anything malformed reads as absent.
    pub fn parse_list(raw: &str) -> Option<Vec<Source>> {
        serde_json::from_str(raw).ok()
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Ulid,
    pub conversation_id: Ulid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    /// Assigned by the store (Unix millis).
    pub created_at: u64,
    /// Folded into a summary; kept for audit, excluded from prompts.
    #[serde(default)]
    pub archived: bool,
}

/// A message before the store has assigned its timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Ulid,
    pub conversation_id: Ulid,
    pub role: Role,
    pub content: String,
    pub sources: Option<Vec<Source>>,
}

impl NewMessage {
    pub fn user(conversation_id: Ulid, content: &str) -> Self {
        Self::new(conversation_id, Role::User, content, None)
    }

    pub fn assistant(conversation_id: Ulid, content: &str, sources: Option<Vec<Source>>) -> Self {
        Self::new(conversation_id, Role::Assistant, content, sources)
    }

    pub fn summary(conversation_id: Ulid, content: &str) -> Self {
        Self::new(conversation_id, Role::SystemSummary, content, None)
    }

    fn new(conversation_id: Ulid, role: Role, content: &str, sources: Option<Vec<Source>>) -> Self {
        Self {
            id: Ulid::new(),
            conversation_id,
            role,
            content: content.to_string(),
            sources,
        }
    }
}

/// Role of a turn sent to a generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

/// One entry of the message array sent to a generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// How a provider expects the system prompt to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptShape {
    /// System prompt as a separate parameter; turns are user/assistant only.
    Anthropic,
    /// System prompt as the first message with role `system`.
    WorkersAi,
}

/// A provider-ready prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    pub shape: PromptShape,
    pub system_prompt: String,
    pub messages: Vec<ChatTurn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::User, Role::Assistant, Role::SystemSummary] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn test_role_serde_names() {
        let json = serde_json::to_string(&Role::SystemSummary).unwrap();
        assert_eq!(json, "\"system-summary\"");
    }

    #[test]
    fn test_parse_metadata_fails_soft() {
        assert!(parse_metadata("not json").is_empty());
        assert!(parse_metadata("[1,2]").is_empty());
        let map = parse_metadata(r#"{"author":"ana","pages":3}"#);
        assert_eq!(map.get("author").and_then(|v| v.as_str()), Some("ana"));
    }

    #[test]
    fn test_source_list_fails_soft() {
        assert_eq!(Source::parse_list("{oops"), None);
        let parsed = Source::parse_list(r#"[{"id":"a","text":"b"}]"#).unwrap();
        assert_eq!(parsed[0].id, "a");
    }

    #[test]
    fn test_vector_record_shares_note_id() {
        let doc = Ulid::new();
        let note = Note::new(Some(doc), 2, "text");
        let record = VectorRecord::for_note(&note, vec![0.0; 4]);
        assert_eq!(record.id, note.id);
        assert_eq!(record.metadata.note_id, note.id);
        assert_eq!(record.metadata.document_id, Some(doc));
        assert_eq!(record.metadata.chunk_index, 2);
    }

    #[test]
    fn test_document_metadata_accessor() {
        let doc = Document {
            id: Ulid::new(),
            title: "t".into(),
            content_type: "text/plain".into(),
            uploaded_at: 0,
            chunk_count: 0,
            metadata: parse_metadata(r#"{"lang":"en","n":1}"#),
        };
        assert_eq!(doc.metadata_str("lang"), Some("en"));
        assert_eq!(doc.metadata_str("n"), None);
        assert_eq!(doc.metadata_str("missing"), None);
    }
}
