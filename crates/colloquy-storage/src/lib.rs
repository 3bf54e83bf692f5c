//! Colloquy Storage crate - SQLite persistence for agents, sessions,
//! messages, documents and document chunks.
//!
//! Provides a WAL-mode SQLite database with migrations and one repository
//! per aggregate. Parent deletes walk their owned children explicitly
//! inside a single transaction.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{
    AgentRepository, AgentUpdate, DocumentRepository, MessagePage, MessageRepository,
    SessionRepository,
};
