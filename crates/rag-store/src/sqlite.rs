//! SQLite-based storage implementation.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};
use ulid::Ulid;

use rag_core::{
    parse_metadata, BlobStore, Conversation, DatabaseConfig, Document, Message, Metadata,
    NewDocument, NewMessage, Note, RagError, Result, RetrievalMatch, Role, Source, Store,
    VectorIndex, VectorMetadata, VectorRecord, MAX_BLOB_BYTES,
};

use crate::cosine_similarity;
use crate::schema::SCHEMA;

/// SQLite-based store implementation.
///
/// One connection behind a blocking mutex serves the relational tables, the
/// blob table and the brute-force vector table.
pub struct SqliteStore {
    /// Connection wrapped in blocking Mutex.
    conn: Arc<Mutex<Connection>>,

    /// Vector dimension persisted in `index_meta`.
    dimension: usize,
}

impl SqliteStore {
    /// Open or create a database at the configured path.
    pub fn open(config: &DatabaseConfig, dimension: usize) -> Result<Self> {
        let path = config.path.as_path();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::database(format!("Failed to open database: {}", e)))?;

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms as u64))
            .map_err(|e| RagError::database(e.to_string()))?;

        Self::init(conn, dimension, path)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RagError::database(format!("Failed to open in-memory database: {}", e)))?;

        Self::init(conn, dimension, Path::new(":memory:"))
    }

    /// Initialize the store with a connection.
    fn init(conn: Connection, dimension: usize, path: &Path) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::config("vector dimension must be > 0"));
        }

        Self::configure_connection(&conn)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| RagError::database(format!("Failed to initialize schema: {}", e)))?;

        Self::check_dimension(&conn, dimension)?;

        info!("Database opened at {:?} (dimension {})", path, dimension);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    /// Configure SQLite connection for optimal performance.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RagError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Persist the dimension on first open and refuse a different one later.
    fn check_dimension(conn: &Connection, dimension: usize) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RagError::database(e.to_string()))?;

        match stored {
            None => {
                conn.execute(
                    "INSERT INTO index_meta (key, value) VALUES ('dimension', ?1)",
                    params![dimension.to_string()],
                )
                .map_err(|e| RagError::database(e.to_string()))?;
                Ok(())
            }
            Some(value) => match value.parse::<usize>() {
                Ok(existing) if existing == dimension => Ok(()),
                Ok(existing) => Err(RagError::config(format!(
                    "vector index was created with dimension {}, embedder produces {}",
                    existing, dimension
                ))),
                Err(_) => Err(RagError::database(format!(
                    "corrupt index dimension: {:?}",
                    value
                ))),
            },
        }
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.conn.lock().map_err(|e| RagError::database(e.to_string()))?;
        f(&conn)
    }
}

#[async_trait]
impl Store for SqliteStore {
    // Document operations

    async fn insert_document(&self, doc: NewDocument) -> Result<Document> {
        let metadata = serde_json::to_string(&doc.metadata)?;

        self.with_conn(|conn| {
            let uploaded_at: i64 = conn
                .query_row(
                    r#"
                    INSERT INTO documents (id, title, content_type, metadata)
                    VALUES (?1, ?2, ?3, ?4)
                    RETURNING uploaded_at
                    "#,
                    params![doc.id.to_string(), doc.title, doc.content_type, metadata],
                    |row| row.get(0),
                )
                .map_err(|e| RagError::database(format!("Failed to insert document: {}", e)))?;

            debug!("Inserted document: {}", doc.id);
            Ok(Document {
                id: doc.id,
                title: doc.title,
                content_type: doc.content_type,
                uploaded_at: uploaded_at as u64,
                chunk_count: 0,
                metadata: doc.metadata,
            })
        })
    }

    async fn get_document(&self, id: Ulid) -> Result<Option<Document>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, title, content_type, metadata, chunk_count, uploaded_at
                    FROM documents WHERE id = ?1
                    "#,
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            let result = stmt
                .query_row(params![id.to_string()], Self::row_to_document)
                .optional()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(result)
        })
    }

    async fn list_documents(&self, limit: u32, offset: u32) -> Result<Vec<Document>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, title, content_type, metadata, chunk_count, uploaded_at
                    FROM documents
                    ORDER BY uploaded_at DESC, seq DESC
                    LIMIT ?1 OFFSET ?2
                    "#,
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            let documents = stmt
                .query_map(params![limit, offset], Self::row_to_document)
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(documents)
        })
    }

    async fn set_chunk_count(&self, id: Ulid, chunk_count: u32) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE documents SET chunk_count = ?2 WHERE id = ?1",
                    params![id.to_string(), chunk_count],
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            if updated == 0 {
                return Err(RagError::DocumentNotFound { id: id.to_string() });
            }
            Ok(())
        })
    }

    async fn delete_document(&self, id: Ulid) -> Result<()> {
        self.with_conn(|conn| {
            // Notes are deleted by CASCADE
            let deleted = conn
                .execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])
                .map_err(|e| RagError::database(e.to_string()))?;

            if deleted == 0 {
                return Err(RagError::DocumentNotFound { id: id.to_string() });
            }

            debug!("Deleted document: {}", id);
            Ok(())
        })
    }

    // Note operations

    async fn insert_notes(&self, notes: &[Note]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO notes (id, document_id, text, chunk_index) VALUES (?1, ?2, ?3, ?4)",
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;

                for note in notes {
                    stmt.execute(params![
                        note.id.to_string(),
                        note.document_id.map(|d| d.to_string()),
                        note.text,
                        note.chunk_index,
                    ])
                    .map_err(|e| RagError::database(format!("Failed to insert note: {}", e)))?;
                }
            }

            tx.commit().map_err(|e| RagError::database(e.to_string()))?;

            debug!("Inserted {} notes", notes.len());
            Ok(())
        })
    }

    async fn get_notes(&self, ids: &[Ulid]) -> Result<Vec<Note>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, document_id, text, chunk_index FROM notes WHERE id IN ({})",
            placeholders
        );
        let keys: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RagError::database(e.to_string()))?;

            let notes = stmt
                .query_map(params_from_iter(keys.iter()), Self::row_to_note)
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(notes)
        })
    }

    async fn notes_for_document(&self, doc_id: Ulid) -> Result<Vec<Note>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, document_id, text, chunk_index
                    FROM notes
                    WHERE document_id = ?1
                    ORDER BY chunk_index
                    "#,
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            let notes = stmt
                .query_map(params![doc_id.to_string()], Self::row_to_note)
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(notes)
        })
    }

    // Conversation operations

    async fn create_conversation(&self) -> Result<Conversation> {
        let id = Ulid::new();
        self.with_conn(|conn| {
            let created_at: i64 = conn
                .query_row(
                    "INSERT INTO conversations (id) VALUES (?1) RETURNING created_at",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| RagError::database(format!("Failed to create conversation: {}", e)))?;

            debug!("Created conversation: {}", id);
            Ok(Conversation {
                id,
                created_at: created_at as u64,
            })
        })
    }

    async fn get_conversation(&self, id: Ulid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT created_at FROM conversations WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(result.map(|created_at| Conversation {
                id,
                created_at: created_at as u64,
            }))
        })
    }

    async fn delete_conversation(&self, id: Ulid) -> Result<()> {
        self.with_conn(|conn| {
            // Messages are deleted by CASCADE
            let deleted = conn
                .execute(
                    "DELETE FROM conversations WHERE id = ?1",
                    params![id.to_string()],
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            if deleted == 0 {
                return Err(RagError::ConversationNotFound { id: id.to_string() });
            }

            debug!("Deleted conversation: {}", id);
            Ok(())
        })
    }

    // Message operations

    async fn insert_message(&self, msg: NewMessage) -> Result<Message> {
        let sources = msg
            .sources
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // never earlier than the conversation's latest message, even if the
        // wall clock steps back
        self.with_conn(|conn| {
            let created_at: i64 = conn
                .query_row(
                    r#"
                    INSERT INTO messages (id, conversation_id, role, content, sources, created_at)
                    VALUES (
                        ?1, ?2, ?3, ?4, ?5,
                        MAX(
                            CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER),
                            COALESCE(
                                (SELECT MAX(created_at) FROM messages WHERE conversation_id = ?2),
                                0
                            )
                        )
                    )
                    RETURNING created_at
                    "#,
                    params![
                        msg.id.to_string(),
                        msg.conversation_id.to_string(),
                        msg.role.as_str(),
                        msg.content,
                        sources,
                    ],
                    |row| row.get(0),
                )
                .map_err(|e| {
                    if e.to_string().contains("FOREIGN KEY constraint") {
                        RagError::ConversationNotFound {
                            id: msg.conversation_id.to_string(),
                        }
                    } else {
                        RagError::database(format!("Failed to insert message: {}", e))
                    }
                })?;

            Ok(Message {
                id: msg.id,
                conversation_id: msg.conversation_id,
                role: msg.role,
                content: msg.content,
                sources: msg.sources,
                created_at: created_at as u64,
                archived: false,
            })
        })
    }

    async fn list_messages(&self, conversation_id: Ulid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, conversation_id, role, content, sources, created_at, archived
                    FROM messages
                    WHERE conversation_id = ?1
                    ORDER BY created_at, seq
                    "#,
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            let messages = stmt
                .query_map(params![conversation_id.to_string()], Self::row_to_message)
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(messages)
        })
    }

    async fn archive_messages(&self, conversation_id: Ulid, ids: &[Ulid]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        "UPDATE messages SET archived = 1 WHERE conversation_id = ?1 AND id = ?2",
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;

                for id in ids {
                    stmt.execute(params![conversation_id.to_string(), id.to_string()])
                        .map_err(|e| RagError::database(e.to_string()))?;
                }
            }

            tx.commit().map_err(|e| RagError::database(e.to_string()))?;

            debug!("Archived {} messages in {}", ids.len(), conversation_id);
            Ok(())
        })
    }
}

#[async_trait]
impl BlobStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM blobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RagError::database(e.to_string()))
        })
    }

    async fn put(&self, key: &str, value: &[u8], metadata: &Metadata) -> Result<()> {
        if value.len() > MAX_BLOB_BYTES {
            return Err(RagError::PayloadTooLarge {
                size: value.len(),
                limit: MAX_BLOB_BYTES,
            });
        }
        let metadata = serde_json::to_string(metadata)?;

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO blobs (key, value, metadata) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, metadata = excluded.metadata
                "#,
                params![key, value, metadata],
            )
            .map_err(|e| RagError::database(format!("Failed to put blob: {}", e)))?;
            Ok(())
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM blobs WHERE key = ?1", params![key])
                .map_err(|e| RagError::database(e.to_string()))?;
            Ok(())
        })
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
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
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, Vec<u8>, Option<String>)> = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, embedding, metadata FROM vectors")
                .map_err(|e| RagError::retrieval(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .map_err(|e| RagError::retrieval(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::retrieval(e.to_string()))?;
            Ok(rows)
        })?;

        let mut matches: Vec<RetrievalMatch> = rows
            .into_iter()
            .filter_map(|(id, bytes, metadata)| {
                let embedding = Self::bytes_to_vec(&bytes);
                if embedding.len() != self.dimension {
                    warn!("Skipping vector {} with dimension {}", id, embedding.len());
                    return None;
                }
                Some(RetrievalMatch {
                    id: Ulid::from_string(&id).unwrap_or_else(|_| Ulid::nil()),
                    score: cosine_similarity(vector, &embedding),
                    metadata: metadata
                        .and_then(|m| serde_json::from_str::<VectorMetadata>(&m).ok()),
                })
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

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO vectors (id, embedding, metadata) VALUES (?1, ?2, ?3)
                        ON CONFLICT(id) DO UPDATE
                            SET embedding = excluded.embedding, metadata = excluded.metadata
                        "#,
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;

                for record in records {
                    let metadata = serde_json::to_string(&record.metadata)?;
                    stmt.execute(params![
                        record.id.to_string(),
                        Self::vec_to_bytes(&record.embedding),
                        metadata,
                    ])
                    .map_err(|e| RagError::database(format!("Failed to upsert vector: {}", e)))?;
                }
            }

            tx.commit().map_err(|e| RagError::database(e.to_string()))?;

            debug!("Upserted {} vectors", records.len());
            Ok(())
        })
    }

    async fn delete_by_ids(&self, ids: &[Ulid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM vectors WHERE id IN ({})", placeholders);
        let keys: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        self.with_conn(|conn| {
            let deleted = conn
                .execute(&sql, params_from_iter(keys.iter()))
                .map_err(|e| RagError::database(e.to_string()))?;
            debug!("Deleted {} vectors", deleted);
            Ok(())
        })
    }
}

// Helper methods
impl SqliteStore {
    /// Convert a row to a Document.
    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        let id_str: String = row.get(0)?;
        let metadata_str: String = row.get(3)?;

        Ok(Document {
            id: Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
            title: row.get(1)?,
            content_type: row.get(2)?,
            metadata: parse_metadata(&metadata_str),
            chunk_count: row.get(4)?,
            uploaded_at: row.get::<_, i64>(5)? as u64,
        })
    }

    /// Convert a row to a Note.
    fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
        let id_str: String = row.get(0)?;
        let doc_id: Option<String> = row.get(1)?;

        Ok(Note {
            id: Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
            document_id: doc_id.and_then(|d| Ulid::from_string(&d).ok()),
            text: row.get(2)?,
            chunk_index: row.get(3)?,
        })
    }

    /// Convert a row to a Message. Malformed sources read as absent.
    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
        let id_str: String = row.get(0)?;
        let conv_str: String = row.get(1)?;
        let role_str: String = row.get(2)?;
        let sources: Option<String> = row.get(4)?;

        let role = Role::parse(&role_str).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(2, "role".to_string(), rusqlite::types::Type::Text)
        })?;

        Ok(Message {
            id: Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
            conversation_id: Ulid::from_string(&conv_str).unwrap_or_else(|_| Ulid::nil()),
            role,
            content: row.get(3)?,
            sources: sources.as_deref().and_then(Source::parse_list),
            created_at: row.get::<_, i64>(5)? as u64,
            archived: row.get::<_, i64>(6)? != 0,
        })
    }

    /// Convert f32 vector to bytes (little-endian).
    fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Convert little-endian bytes back to an f32 vector.
    fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}
