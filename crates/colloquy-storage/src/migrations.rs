//! Database schema migrations.
//!
//! Applies the initial schema: agents, sessions, messages, documents,
//! document_chunks and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use colloquy_core::error::ColloquyError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ColloquyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ColloquyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ColloquyError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// Timestamps are microseconds since the Unix epoch. Foreign keys carry no
/// ON DELETE action: repositories delete children before their parent.
fn apply_v1(conn: &Connection) -> Result<(), ColloquyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS agents (
            id              TEXT PRIMARY KEY NOT NULL,
            name            TEXT NOT NULL,
            system_prompt   TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY NOT NULL,
            agent_id        TEXT NOT NULL REFERENCES agents (id),
            title           TEXT,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_agent
            ON sessions (agent_id, updated_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY NOT NULL,
            session_id      TEXT NOT NULL REFERENCES sessions (id),
            role            TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            message_type    TEXT NOT NULL DEFAULT 'text'
                            CHECK (message_type IN ('text', 'voice')),
            content         TEXT NOT NULL,
            audio_url       TEXT,
            tts_audio_url   TEXT,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session_created
            ON messages (session_id, created_at);

        CREATE TABLE IF NOT EXISTS documents (
            id              TEXT PRIMARY KEY NOT NULL,
            agent_id        TEXT NOT NULL REFERENCES agents (id),
            filename        TEXT NOT NULL,
            file_type       TEXT NOT NULL CHECK (file_type IN ('pdf', 'txt', 'md')),
            file_size       INTEGER NOT NULL,
            chunk_count     INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_agent
            ON documents (agent_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS document_chunks (
            id              TEXT PRIMARY KEY NOT NULL,
            document_id     TEXT NOT NULL REFERENCES documents (id),
            content         TEXT NOT NULL,
            embedding       BLOB NOT NULL,
            chunk_index     INTEGER NOT NULL,
            token_count     INTEGER NOT NULL DEFAULT 0,
            UNIQUE (document_id, chunk_index)
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ColloquyError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
