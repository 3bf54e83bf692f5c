//! Colloquy API crate - axum HTTP server, route handlers, SSE streaming.
//!
//! Provides the REST API for agents, sessions, messages and knowledge-base
//! documents, the streaming chat endpoint, voice turns, audio file serving
//! and the health check.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::{AiServices, AppState};
