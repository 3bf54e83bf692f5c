//! Route handler functions for all API endpoints.
//!
//! Each handler extracts path, query, JSON or multipart input via axum
//! extractors, calls into the repositories or chat services held by
//! AppState, and returns JSON (or an SSE stream for chat turns).

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use colloquy_chat::{audio_content_type, VoiceTurnResult};
use colloquy_core::types::{Agent, Document, Message, Session};
use colloquy_storage::AgentUpdate;

use crate::error::ApiError;
use crate::state::AppState;

pub const MAX_AGENT_NAME_CHARS: usize = 100;
pub const MAX_SESSION_TITLE_CHARS: usize = 200;
pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 100;
/// Messages included in a session detail response.
pub const SESSION_DETAIL_MESSAGES: u64 = 50;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub system_prompt: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefineRequest {
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageListParams {
    pub limit: Option<u64>,
    /// Id of the oldest message already seen.
    pub before: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub openai: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct AgentResponse {
    #[serde(flatten)]
    pub agent: Agent,
    pub session_count: u64,
}

#[derive(Debug, Serialize)]
pub struct AgentListResponse {
    pub agents: Vec<AgentResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefineResponse {
    pub system_prompt: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: Session,
    pub message_count: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    #[serde(flatten)]
    pub session: Session,
    pub message_count: u64,
    /// The most recent messages, oldest first.
    pub messages: Vec<Message>,
    pub agent: AgentResponse,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub total_count: u64,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<Document>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DocumentUploadResponse {
    pub message: String,
    pub document: Document,
    pub chunk_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentDeleteResponse {
    pub message: String,
    pub document_id: Uuid,
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - database and AI configuration status.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.database.ping() {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "Health check database ping failed");
            "error"
        }
    };
    let openai = if state.config.openai.is_configured() {
        "configured"
    } else {
        "not_configured"
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        openai: openai.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// =============================================================================
// Agents
// =============================================================================

fn validate_agent_name(name: &str) -> Result<(), ApiError> {
    let len = name.chars().count();
    if name.trim().is_empty() || len > MAX_AGENT_NAME_CHARS {
        return Err(ApiError::UnprocessableEntity(format!(
            "'name' must be between 1 and {} characters",
            MAX_AGENT_NAME_CHARS
        )));
    }
    Ok(())
}

fn validate_system_prompt(prompt: &str) -> Result<(), ApiError> {
    if prompt.trim().is_empty() {
        return Err(ApiError::UnprocessableEntity(
            "'system_prompt' must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn agent_not_found() -> ApiError {
    ApiError::NotFound("Agent not found".to_string())
}

fn session_not_found() -> ApiError {
    ApiError::NotFound("Session not found".to_string())
}

/// GET /agents - all agents, newest first, with session counts.
pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<AgentListResponse>, ApiError> {
    let agents: Vec<AgentResponse> = state
        .agents
        .list_with_session_counts()?
        .into_iter()
        .map(|(agent, session_count)| AgentResponse {
            agent,
            session_count,
        })
        .collect();

    Ok(Json(AgentListResponse {
        total: agents.len(),
        agents,
    }))
}

/// POST /agents - create an agent.
pub async fn create_agent(
    State(state): State<AppState>,
    Json(body): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<AgentResponse>), ApiError> {
    validate_agent_name(&body.name)?;
    validate_system_prompt(&body.system_prompt)?;

    let agent = Agent::new(body.name, body.system_prompt);
    state.agents.create(&agent)?;
    info!(agent_id = %agent.id, name = %agent.name, "Agent created");

    Ok((
        StatusCode::CREATED,
        Json(AgentResponse {
            agent,
            session_count: 0,
        }),
    ))
}

/// GET /agents/{id}
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<AgentResponse>, ApiError> {
    let agent = state
        .agents
        .find_by_id(agent_id)?
        .ok_or_else(agent_not_found)?;
    let session_count = state.agents.session_count(agent_id)?;
    Ok(Json(AgentResponse {
        agent,
        session_count,
    }))
}

/// PUT /agents/{id} - partial update of name and/or system prompt.
pub async fn update_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(body): Json<UpdateAgentRequest>,
) -> Result<Json<AgentResponse>, ApiError> {
    if let Some(name) = &body.name {
        validate_agent_name(name)?;
    }
    if let Some(prompt) = &body.system_prompt {
        validate_system_prompt(prompt)?;
    }

    let update = AgentUpdate {
        name: body.name,
        system_prompt: body.system_prompt,
    };
    let agent = state
        .agents
        .update(agent_id, &update)?
        .ok_or_else(agent_not_found)?;
    let session_count = state.agents.session_count(agent_id)?;
    info!(agent_id = %agent_id, "Agent updated");

    Ok(Json(AgentResponse {
        agent,
        session_count,
    }))
}

/// DELETE /agents/{id} - delete an agent and everything it owns.
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.agents.delete(agent_id)? {
        return Err(agent_not_found());
    }
    info!(agent_id = %agent_id, "Agent deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /agents/refine - generate a system prompt from a short description.
pub async fn refine_prompt(
    State(state): State<AppState>,
    Json(body): Json<RefineRequest>,
) -> Result<Json<RefineResponse>, ApiError> {
    let system_prompt = state.refiner.refine(&body.description).await?;
    Ok(Json(RefineResponse { system_prompt }))
}

// =============================================================================
// Sessions
// =============================================================================

/// GET /agents/{id}/sessions - most recently active first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<SessionListResponse>, ApiError> {
    if state.agents.find_by_id(agent_id)?.is_none() {
        return Err(agent_not_found());
    }

    let sessions: Vec<SessionResponse> = state
        .sessions
        .list_for_agent(agent_id)?
        .into_iter()
        .map(|(session, message_count)| SessionResponse {
            session,
            message_count,
        })
        .collect();

    Ok(Json(SessionListResponse {
        total: sessions.len(),
        sessions,
    }))
}

/// POST /agents/{id}/sessions - the JSON body with an optional `title` may be omitted.
pub async fn create_session(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let request: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?
    };
    if let Some(title) = &request.title {
        if title.chars().count() > MAX_SESSION_TITLE_CHARS {
            return Err(ApiError::UnprocessableEntity(format!(
                "'title' must be at most {} characters",
                MAX_SESSION_TITLE_CHARS
            )));
        }
    }

    if state.agents.find_by_id(agent_id)?.is_none() {
        return Err(agent_not_found());
    }

    let session = Session::new(agent_id, request.title);
    state.sessions.create(&session)?;
    info!(session_id = %session.id, agent_id = %agent_id, "Session created");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session,
            message_count: 0,
        }),
    ))
}

/// GET /sessions/{id} - session with its agent and most recent messages.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionDetailResponse>, ApiError> {
    let session = state
        .sessions
        .find_by_id(session_id)?
        .ok_or_else(session_not_found)?;
    let agent = state
        .agents
        .find_by_id(session.agent_id)?
        .ok_or_else(agent_not_found)?;
    let page = state
        .messages
        .list_page(session_id, SESSION_DETAIL_MESSAGES, None)?;
    let session_count = state.agents.session_count(agent.id)?;

    Ok(Json(SessionDetailResponse {
        session,
        message_count: page.total_count,
        messages: page.messages,
        agent: AgentResponse {
            agent,
            session_count,
        },
    }))
}

/// DELETE /sessions/{id} - delete a session and its messages.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.sessions.delete(session_id)? {
        return Err(session_not_found());
    }
    info!(session_id = %session_id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Messages
// =============================================================================

/// GET /sessions/{id}/messages - cursor-paginated history, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(params): Query<MessageListParams>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ApiError::UnprocessableEntity(format!(
            "'limit' must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    if state.sessions.find_by_id(session_id)?.is_none() {
        return Err(session_not_found());
    }

    let page = state.messages.list_page(session_id, limit, params.before)?;
    Ok(Json(MessageListResponse {
        messages: page.messages,
        has_more: page.has_more,
        total_count: page.total_count,
    }))
}

/// POST /sessions/{id}/messages - run a chat turn, streaming the reply.
///
/// Emits `token` events as the reply is generated, then a single `done`
/// or `error` event.
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    let handle = state.orchestrator.start_turn(session_id, &body.content)?;
    debug!(
        session_id = %session_id,
        message_id = %handle.user_message.id,
        "Streaming chat turn"
    );

    let stream = ReceiverStream::new(handle.events).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event(event.name()).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

// =============================================================================
// Voice and audio
// =============================================================================

/// A file part read from a multipart body.
struct UploadedFile {
    bytes: Vec<u8>,
    filename: Option<String>,
    content_type: Option<String>,
}

/// Read the first multipart field named `field_name`.
async fn read_upload(multipart: &mut Multipart, field_name: &str) -> Result<UploadedFile, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(field_name) {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
        return Ok(UploadedFile {
            bytes: bytes.to_vec(),
            filename,
            content_type,
        });
    }
    Err(ApiError::BadRequest(format!(
        "Missing '{}' file field",
        field_name
    )))
}

/// POST /sessions/{id}/voice - multipart `audio` field.
pub async fn send_voice(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<VoiceTurnResult>, ApiError> {
    let upload = read_upload(&mut multipart, "audio").await?;
    let result = state
        .voice
        .run(session_id, &upload.bytes, upload.content_type.as_deref())
        .await?;
    Ok(Json(result))
}

/// GET /audio/{folder}/{filename} - serve a stored recording or reply.
pub async fn get_audio(
    State(state): State<AppState>,
    Path((folder, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state
        .audio
        .resolve(&folder, &filename)
        .ok_or_else(|| ApiError::NotFound("Audio file not found".to_string()))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read audio file: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, audio_content_type(&filename))], bytes))
}

// =============================================================================
// Documents
// =============================================================================

/// GET /agents/{id}/documents - newest first.
pub async fn list_documents(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    if state.agents.find_by_id(agent_id)?.is_none() {
        return Err(agent_not_found());
    }
    let documents = state.documents.list_for_agent(agent_id)?;
    Ok(Json(DocumentListResponse {
        total: documents.len(),
        documents,
    }))
}

/// POST /agents/{id}/documents - multipart `file` field (.pdf, .txt or .md).
pub async fn upload_document(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<DocumentUploadResponse>, ApiError> {
    if state.agents.find_by_id(agent_id)?.is_none() {
        return Err(agent_not_found());
    }

    let upload = read_upload(&mut multipart, "file").await?;
    let filename = upload
        .filename
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Uploaded file has no name".to_string()))?;

    let outcome = state
        .ingestion
        .ingest(agent_id, upload.bytes, &filename)
        .await?;

    Ok(Json(DocumentUploadResponse {
        message: "Document uploaded and processed successfully".to_string(),
        chunk_count: outcome.document.chunk_count,
        document: outcome.document,
    }))
}

/// DELETE /documents/{id} - delete a document and its chunks.
pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<DocumentDeleteResponse>, ApiError> {
    if !state.documents.delete(document_id)? {
        return Err(ApiError::NotFound("Document not found".to_string()));
    }
    info!(document_id = %document_id, "Document deleted");
    Ok(Json(DocumentDeleteResponse {
        message: "Document deleted successfully".to_string(),
        document_id,
    }))
}
