//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and foreign keys on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use tracing::info;

use colloquy_core::error::ColloquyError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not Sync.
/// Every unit of work runs while the lock is held, so a write and the reads
/// that guard it cannot interleave with another request.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, ColloquyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ColloquyError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| ColloquyError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ColloquyError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ColloquyError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| ColloquyError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ColloquyError>
    where
        F: FnOnce(&Connection) -> Result<T, ColloquyError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ColloquyError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a closure inside a transaction.
    ///
    /// Commits when the closure returns `Ok`, rolls back otherwise.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, ColloquyError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, ColloquyError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ColloquyError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| ColloquyError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| ColloquyError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(value)
    }

    /// Cheap liveness probe used by the health endpoint.
    pub fn ping(&self) -> Result<(), ColloquyError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM agents", [], |row| row.get(0))
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
        assert!(db.ping().is_ok());
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("colloquy.db");
        let db = Database::new(&path).unwrap();

        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            assert_eq!(mode, "wal");
            Ok(())
        })
        .unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::in_memory().unwrap();
        let result: Result<(), ColloquyError> = db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO agents (id, name, system_prompt, created_at, updated_at)
                 VALUES ('a', 'n', 'p', 0, 0)",
                [],
            )
            .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            Err(ColloquyError::Storage("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM agents", [], |row| row.get(0))
                    .map_err(|e| ColloquyError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::in_memory().unwrap();
        let result = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, agent_id, title, created_at, updated_at)
                 VALUES ('s', 'missing-agent', NULL, 0, 0)",
                [],
            )
            .map_err(|e| ColloquyError::Storage(e.to_string()))
        });
        assert!(result.is_err());
    }
}
