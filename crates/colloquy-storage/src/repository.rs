//! Repository implementations for SQLite-backed persistence.
//!
//! Provides AgentRepository, SessionRepository, MessageRepository and
//! DocumentRepository that operate on the Database struct using raw SQL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use colloquy_core::error::ColloquyError;
use colloquy_core::types::{
    Agent, Document, DocumentChunk, DocumentType, Message, MessageRole, MessageType, Session,
};

use crate::db::Database;

const MESSAGE_COLUMNS: &str =
    "id, session_id, role, message_type, content, audio_url, tts_audio_url, created_at";

const DOCUMENT_COLUMNS: &str =
    "id, agent_id, filename, file_type, file_size, chunk_count, created_at";

// =============================================================================
// Agents
// =============================================================================

/// Partial update for an agent. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
}

/// Repository for agents.
#[derive(Clone)]
pub struct AgentRepository {
    db: Arc<Database>,
}

impl AgentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a new agent.
    pub fn create(&self, agent: &Agent) -> Result<(), ColloquyError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agents (id, name, system_prompt, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    agent.id.to_string(),
                    agent.name,
                    agent.system_prompt,
                    to_micros(&agent.created_at),
                    to_micros(&agent.updated_at),
                ],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to save agent: {}", e)))?;
            Ok(())
        })
    }

    /// Find an agent by ID.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Agent>, ColloquyError> {
        self.db.with_conn(|conn| find_agent(conn, id))
    }

    /// List all agents, newest first, with their session counts.
    pub fn list_with_session_counts(&self) -> Result<Vec<(Agent, u64)>, ColloquyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT a.id, a.name, a.system_prompt, a.created_at, a.updated_at,
                            (SELECT COUNT(*) FROM sessions s WHERE s.agent_id = a.id)
                     FROM agents a
                     ORDER BY a.created_at DESC, a.rowid DESC",
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    let count: i64 = row.get(5)?;
                    Ok(row_to_agent(row).map(|agent| (agent, count as u64)))
                })
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let mut agents = Vec::new();
            for row in rows {
                agents.push(row.map_err(|e| ColloquyError::Storage(e.to_string()))??);
            }
            Ok(agents)
        })
    }

    /// Count the sessions owned by an agent.
    pub fn session_count(&self, id: Uuid) -> Result<u64, ColloquyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sessions WHERE agent_id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Apply a partial update. Returns the updated agent, or `None` when absent.
    pub fn update(&self, id: Uuid, update: &AgentUpdate) -> Result<Option<Agent>, ColloquyError> {
        self.db.with_conn(|conn| {
            let Some(mut agent) = find_agent(conn, id)? else {
                return Ok(None);
            };
            if let Some(name) = &update.name {
                agent.name = name.clone();
            }
            if let Some(prompt) = &update.system_prompt {
                agent.system_prompt = prompt.clone();
            }
            agent.updated_at = Utc::now();

            conn.execute(
                "UPDATE agents SET name = ?2, system_prompt = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![
                    id.to_string(),
                    agent.name,
                    agent.system_prompt,
                    to_micros(&agent.updated_at),
                ],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to update agent: {}", e)))?;
            Ok(Some(agent))
        })
    }

    /// Delete an agent together with its sessions, messages, documents and chunks.
    ///
    /// Returns `false` when the agent did not exist.
    pub fn delete(&self, id: Uuid) -> Result<bool, ColloquyError> {
        let key = id.to_string();
        self.db.with_transaction(|tx| {
            tx.execute(
                "DELETE FROM document_chunks WHERE document_id IN
                    (SELECT id FROM documents WHERE agent_id = ?1)",
                rusqlite::params![key],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to delete chunks: {}", e)))?;
            tx.execute(
                "DELETE FROM documents WHERE agent_id = ?1",
                rusqlite::params![key],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to delete documents: {}", e)))?;
            tx.execute(
                "DELETE FROM messages WHERE session_id IN
                    (SELECT id FROM sessions WHERE agent_id = ?1)",
                rusqlite::params![key],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to delete messages: {}", e)))?;
            tx.execute(
                "DELETE FROM sessions WHERE agent_id = ?1",
                rusqlite::params![key],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to delete sessions: {}", e)))?;
            let deleted = tx
                .execute("DELETE FROM agents WHERE id = ?1", rusqlite::params![key])
                .map_err(|e| ColloquyError::Storage(format!("Failed to delete agent: {}", e)))?;

            debug!(agent_id = %id, deleted = deleted > 0, "Agent delete");
            Ok(deleted > 0)
        })
    }
}

fn find_agent(conn: &Connection, id: Uuid) -> Result<Option<Agent>, ColloquyError> {
    let result = conn
        .query_row(
            "SELECT id, name, system_prompt, created_at, updated_at FROM agents WHERE id = ?1",
            rusqlite::params![id.to_string()],
            |row| Ok(row_to_agent(row)),
        )
        .optional()
        .map_err(|e| ColloquyError::Storage(e.to_string()))?;

    result.transpose()
}

fn agent_exists(conn: &Connection, id: Uuid) -> Result<bool, ColloquyError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM agents WHERE id = ?1",
            rusqlite::params![id.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| ColloquyError::Storage(e.to_string()))?;
    Ok(count > 0)
}

// =============================================================================
// Sessions
// =============================================================================

/// Repository for chat sessions.
#[derive(Clone)]
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a new session. Fails with `NotFound` when the agent is absent.
    pub fn create(&self, session: &Session) -> Result<(), ColloquyError> {
        self.db.with_conn(|conn| {
            if !agent_exists(conn, session.agent_id)? {
                return Err(ColloquyError::NotFound(format!(
                    "agent {}",
                    session.agent_id
                )));
            }
            conn.execute(
                "INSERT INTO sessions (id, agent_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    session.id.to_string(),
                    session.agent_id.to_string(),
                    session.title,
                    to_micros(&session.created_at),
                    to_micros(&session.updated_at),
                ],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to save session: {}", e)))?;
            Ok(())
        })
    }

    /// Find a session by ID.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, ColloquyError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, agent_id, title, created_at, updated_at FROM sessions WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_session(row)),
                )
                .optional()
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            result.transpose()
        })
    }

    /// List an agent's sessions, most recently active first, with message counts.
    pub fn list_for_agent(&self, agent_id: Uuid) -> Result<Vec<(Session, u64)>, ColloquyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT s.id, s.agent_id, s.title, s.created_at, s.updated_at,
                            (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id)
                     FROM sessions s
                     WHERE s.agent_id = ?1
                     ORDER BY s.updated_at DESC, s.rowid DESC",
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![agent_id.to_string()], |row| {
                    let count: i64 = row.get(5)?;
                    Ok(row_to_session(row).map(|session| (session, count as u64)))
                })
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.map_err(|e| ColloquyError::Storage(e.to_string()))??);
            }
            Ok(sessions)
        })
    }

    /// Count the messages in a session.
    pub fn message_count(&self, id: Uuid) -> Result<u64, ColloquyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Set the title only if none is stored yet.
    ///
    /// Returns `true` when this call wrote the title.
    pub fn set_title_if_absent(&self, id: Uuid, title: &str) -> Result<bool, ColloquyError> {
        self.db.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions SET title = ?2, updated_at = ?3
                     WHERE id = ?1 AND title IS NULL",
                    rusqlite::params![id.to_string(), title, to_micros(&Utc::now())],
                )
                .map_err(|e| ColloquyError::Storage(format!("Failed to set title: {}", e)))?;
            Ok(updated > 0)
        })
    }

    /// Delete a session and its messages. Returns `false` when absent.
    pub fn delete(&self, id: Uuid) -> Result<bool, ColloquyError> {
        let key = id.to_string();
        self.db.with_transaction(|tx| {
            tx.execute(
                "DELETE FROM messages WHERE session_id = ?1",
                rusqlite::params![key],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to delete messages: {}", e)))?;
            let deleted = tx
                .execute("DELETE FROM sessions WHERE id = ?1", rusqlite::params![key])
                .map_err(|e| ColloquyError::Storage(format!("Failed to delete session: {}", e)))?;
            Ok(deleted > 0)
        })
    }
}

// =============================================================================
// Messages
// =============================================================================

/// One page of a session's messages in chronological order.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Older messages exist before the first one returned.
    pub has_more: bool,
    pub total_count: u64,
}

/// Repository for session messages. Messages are append-only.
#[derive(Clone)]
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a message and bump the owning session's `updated_at`.
    ///
    /// Fails with `NotFound` when the session is absent.
    pub fn insert(&self, message: &Message) -> Result<(), ColloquyError> {
        self.db.with_transaction(|tx| insert_message(tx, message))
    }

    /// Insert two messages atomically: either both are stored or neither is.
    pub fn insert_pair(&self, first: &Message, second: &Message) -> Result<(), ColloquyError> {
        self.db.with_transaction(|tx| {
            insert_message(tx, first)?;
            insert_message(tx, second)
        })
    }

    /// Find a message by ID.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Message>, ColloquyError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_message(row)),
                )
                .optional()
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            result.transpose()
        })
    }

    /// The last `limit` messages of a session, oldest first.
    pub fn recent(&self, session_id: Uuid, limit: u64) -> Result<Vec<Message>, ColloquyError> {
        let page = self.list_page(session_id, limit, None)?;
        Ok(page.messages)
    }

    /// Cursor-paginated listing.
    ///
    /// Returns up to `limit` messages created strictly before the `before`
    /// message (or the newest ones when no cursor is given), in chronological
    /// order. An unknown cursor is ignored.
    pub fn list_page(
        &self,
        session_id: Uuid,
        limit: u64,
        before: Option<Uuid>,
    ) -> Result<MessagePage, ColloquyError> {
        let session_key = session_id.to_string();
        self.db.with_conn(|conn| {
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                    rusqlite::params![session_key],
                    |row| row.get(0),
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let cursor: Option<(i64, i64)> = match before {
                Some(id) => conn
                    .query_row(
                        "SELECT created_at, rowid FROM messages WHERE id = ?1 AND session_id = ?2",
                        rusqlite::params![id.to_string(), session_key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .map_err(|e| ColloquyError::Storage(e.to_string()))?,
                None => None,
            };

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE session_id = ?1
                       AND (?2 IS NULL OR (created_at, rowid) < (?2, ?3))
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?4",
                    MESSAGE_COLUMNS
                ))
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![
                        session_key,
                        cursor.map(|c| c.0),
                        cursor.map(|c| c.1),
                        (limit + 1) as i64,
                    ],
                    |row| Ok(row_to_message(row)),
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row.map_err(|e| ColloquyError::Storage(e.to_string()))??);
            }

            let has_more = messages.len() as u64 > limit;
            messages.truncate(limit as usize);
            messages.reverse();

            Ok(MessagePage {
                messages,
                has_more,
                total_count: total as u64,
            })
        })
    }
}

// =============================================================================
// Documents
// =============================================================================

/// Repository for knowledge-base documents and their chunks.
#[derive(Clone)]
pub struct DocumentRepository {
    db: Arc<Database>,
}

impl DocumentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a document and all of its chunks as one transaction.
    ///
    /// The stored `chunk_count` is the number of chunks written. Fails with
    /// `NotFound` when the owning agent is absent; nothing is written then.
    pub fn insert_with_chunks(
        &self,
        mut document: Document,
        chunks: &[DocumentChunk],
    ) -> Result<Document, ColloquyError> {
        document.chunk_count = chunks.len() as u32;

        self.db.with_transaction(|tx| {
            if !agent_exists(tx, document.agent_id)? {
                return Err(ColloquyError::NotFound(format!(
                    "agent {}",
                    document.agent_id
                )));
            }

            tx.execute(
                &format!(
                    "INSERT INTO documents ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    DOCUMENT_COLUMNS
                ),
                rusqlite::params![
                    document.id.to_string(),
                    document.agent_id.to_string(),
                    document.filename,
                    document.file_type.as_str(),
                    document.file_size as i64,
                    document.chunk_count,
                    to_micros(&document.created_at),
                ],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to save document: {}", e)))?;

            let mut stmt = tx
                .prepare(
                    "INSERT INTO document_chunks (id, document_id, content, embedding, chunk_index, token_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            for chunk in chunks {
                if chunk.document_id != document.id {
                    return Err(ColloquyError::Storage(format!(
                        "Chunk {} belongs to document {}, not {}",
                        chunk.id, chunk.document_id, document.id
                    )));
                }
                stmt.execute(rusqlite::params![
                    chunk.id.to_string(),
                    document.id.to_string(),
                    chunk.content,
                    embedding_to_bytes(&chunk.embedding),
                    chunk.chunk_index,
                    chunk.token_count,
                ])
                .map_err(|e| ColloquyError::Storage(format!("Failed to save chunk: {}", e)))?;
            }
            Ok(())
        })?;

        debug!(
            document_id = %document.id,
            agent_id = %document.agent_id,
            chunks = document.chunk_count,
            "Document stored"
        );
        Ok(document)
    }

    /// Find a document by ID.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, ColloquyError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_document(row)),
                )
                .optional()
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            result.transpose()
        })
    }

    /// List an agent's documents, newest first.
    pub fn list_for_agent(&self, agent_id: Uuid) -> Result<Vec<Document>, ColloquyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM documents WHERE agent_id = ?1
                     ORDER BY created_at DESC, rowid DESC",
                    DOCUMENT_COLUMNS
                ))
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![agent_id.to_string()], |row| {
                    Ok(row_to_document(row))
                })
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let mut documents = Vec::new();
            for row in rows {
                documents.push(row.map_err(|e| ColloquyError::Storage(e.to_string()))??);
            }
            Ok(documents)
        })
    }

    /// Delete a document and its chunks. Returns `false` when absent.
    pub fn delete(&self, id: Uuid) -> Result<bool, ColloquyError> {
        let key = id.to_string();
        self.db.with_transaction(|tx| {
            tx.execute(
                "DELETE FROM document_chunks WHERE document_id = ?1",
                rusqlite::params![key],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to delete chunks: {}", e)))?;
            let deleted = tx
                .execute("DELETE FROM documents WHERE id = ?1", rusqlite::params![key])
                .map_err(|e| ColloquyError::Storage(format!("Failed to delete document: {}", e)))?;
            Ok(deleted > 0)
        })
    }

    /// Every chunk of every document owned by the agent.
    ///
    /// Ordered by document upload order, then `chunk_index`, so scans over
    /// the result are deterministic.
    pub fn chunks_for_agent(&self, agent_id: Uuid) -> Result<Vec<DocumentChunk>, ColloquyError> {
        self.query_chunks(
            "SELECT c.id, c.document_id, c.content, c.embedding, c.chunk_index, c.token_count
             FROM document_chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE d.agent_id = ?1
             ORDER BY d.created_at, d.rowid, c.chunk_index",
            agent_id,
        )
    }

    /// The chunks of one document in `chunk_index` order.
    pub fn chunks_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<DocumentChunk>, ColloquyError> {
        self.query_chunks(
            "SELECT id, document_id, content, embedding, chunk_index, token_count
             FROM document_chunks
             WHERE document_id = ?1
             ORDER BY chunk_index",
            document_id,
        )
    }

    /// Number of stored chunks scoped to an agent.
    pub fn chunk_count_for_agent(&self, agent_id: Uuid) -> Result<u64, ColloquyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM document_chunks c
                     JOIN documents d ON d.id = c.document_id
                     WHERE d.agent_id = ?1",
                    rusqlite::params![agent_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    fn query_chunks(&self, sql: &str, key: Uuid) -> Result<Vec<DocumentChunk>, ColloquyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![key.to_string()], |row| {
                    Ok(row_to_chunk(row))
                })
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let mut chunks = Vec::new();
            for row in rows {
                chunks.push(row.map_err(|e| ColloquyError::Storage(e.to_string()))??);
            }
            Ok(chunks)
        })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
}

fn parse_uuid(value: &str) -> Result<Uuid, ColloquyError> {
    Uuid::parse_str(value).map_err(|e| ColloquyError::Storage(format!("Invalid UUID: {}", e)))
}

fn column<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> Result<T, ColloquyError> {
    row.get(idx)
        .map_err(|e| ColloquyError::Storage(e.to_string()))
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> Result<Agent, ColloquyError> {
    let id: String = column(row, 0)?;
    Ok(Agent {
        id: parse_uuid(&id)?,
        name: column(row, 1)?,
        system_prompt: column(row, 2)?,
        created_at: from_micros(column(row, 3)?),
        updated_at: from_micros(column(row, 4)?),
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, ColloquyError> {
    let id: String = column(row, 0)?;
    let agent_id: String = column(row, 1)?;
    Ok(Session {
        id: parse_uuid(&id)?,
        agent_id: parse_uuid(&agent_id)?,
        title: column(row, 2)?,
        created_at: from_micros(column(row, 3)?),
        updated_at: from_micros(column(row, 4)?),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, ColloquyError> {
    let id: String = column(row, 0)?;
    let session_id: String = column(row, 1)?;
    let role_str: String = column(row, 2)?;
    let type_str: String = column(row, 3)?;

    let role = MessageRole::parse(&role_str)
        .ok_or_else(|| ColloquyError::Storage(format!("Unknown message role: {}", role_str)))?;
    let message_type = MessageType::parse(&type_str).unwrap_or_default();

    Ok(Message {
        id: parse_uuid(&id)?,
        session_id: parse_uuid(&session_id)?,
        role,
        message_type,
        content: column(row, 4)?,
        audio_url: column(row, 5)?,
        tts_audio_url: column(row, 6)?,
        created_at: from_micros(column(row, 7)?),
    })
}

fn row_to_document(row: &rusqlite::Row<'_>) -> Result<Document, ColloquyError> {
    let id: String = column(row, 0)?;
    let agent_id: String = column(row, 1)?;
    let type_str: String = column(row, 3)?;
    let file_size: i64 = column(row, 4)?;

    let file_type = DocumentType::from_extension(&type_str)
        .ok_or_else(|| ColloquyError::Storage(format!("Unknown document type: {}", type_str)))?;

    Ok(Document {
        id: parse_uuid(&id)?,
        agent_id: parse_uuid(&agent_id)?,
        filename: column(row, 2)?,
        file_type,
        file_size: file_size.max(0) as u64,
        chunk_count: column(row, 5)?,
        created_at: from_micros(column(row, 6)?),
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> Result<DocumentChunk, ColloquyError> {
    let id: String = column(row, 0)?;
    let document_id: String = column(row, 1)?;
    let blob: Vec<u8> = column(row, 3)?;
    Ok(DocumentChunk {
        id: parse_uuid(&id)?,
        document_id: parse_uuid(&document_id)?,
        content: column(row, 2)?,
        embedding: bytes_to_embedding(&blob),
        chunk_index: column(row, 4)?,
        token_count: column(row, 5)?,
    })
}

/// Encode an embedding as little-endian f32 bytes.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes. Trailing bytes that do not form a full
/// value are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Extension trait for rusqlite to support optional query results.
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Touch the owning session and insert `message` on `conn`.
fn insert_message(conn: &Connection, message: &Message) -> Result<(), ColloquyError> {
    let touched = conn
        .execute(
            "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
            rusqlite::params![
                message.session_id.to_string(),
                to_micros(&message.created_at)
            ],
        )
        .map_err(|e| ColloquyError::Storage(format!("Failed to touch session: {}", e)))?;
    if touched == 0 {
        return Err(ColloquyError::NotFound(format!(
            "session {}",
            message.session_id
        )));
    }

    conn.execute(
        "INSERT INTO messages (id, session_id, role, message_type, content, audio_url, tts_audio_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            message.id.to_string(),
            message.session_id.to_string(),
            message.role.as_str(),
            message.message_type.as_str(),
            message.content,
            message.audio_url,
            message.tts_audio_url,
            to_micros(&message.created_at),
        ],
    )
    .map_err(|e| ColloquyError::Storage(format!("Failed to save message: {}", e)))?;
    Ok(())
}
