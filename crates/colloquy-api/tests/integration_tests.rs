//! Integration tests for the Colloquy API.
//!
//! Exercises every route through the full router, covering happy paths,
//! validation and not-found errors, the SSE chat stream, voice turns with
//! audio serving, and document ingestion. Each test builds its own
//! in-memory state with mock AI services.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use colloquy_api::handlers::HealthResponse;
use colloquy_api::{create_router, AiServices, AppState};
use colloquy_core::config::ColloquyConfig;
use colloquy_llm::{ChatModel, LlmError, Script, ScriptedChatModel};
use colloquy_storage::Database;

// =============================================================================
// Helpers
// =============================================================================

struct TestApp {
    state: AppState,
    _audio_dir: tempfile::TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_chat(Arc::new(ScriptedChatModel::new()))
    }

    fn with_chat(chat: Arc<dyn ChatModel>) -> Self {
        let audio_dir = tempfile::tempdir().unwrap();
        let services = AiServices {
            chat,
            ..AiServices::mock()
        };
        let state = AppState::with_audio_root(
            ColloquyConfig::default(),
            Database::in_memory().unwrap(),
            services,
            audio_dir.path().join("audio"),
        );
        Self {
            state,
            _audio_dir: audio_dir,
        }
    }

    async fn send(&self, req: Request<Body>) -> axum::response::Response {
        create_router(self.state.clone()).oneshot(req).await.unwrap()
    }

    async fn json(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.send(req).await;
        let status = resp.status();
        let bytes = body_bytes(resp).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_agent(&self, name: &str, prompt: &str) -> String {
        let body = serde_json::json!({ "name": name, "system_prompt": prompt });
        let (status, json) = self.json(post_json("/api/agents", &body.to_string())).await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_str().unwrap().to_string()
    }

    async fn create_session(&self, agent_id: &str) -> String {
        let (status, json) = self
            .json(post_empty(&format!("/api/agents/{}/sessions", agent_id)))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_str().unwrap().to_string()
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::delete(uri).body(Body::empty()).unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::post(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn put_json(uri: &str, json: &str) -> Request<Body> {
    Request::put(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

const BOUNDARY: &str = "colloquy-test-boundary";

/// Build a multipart/form-data request with a single file field.
fn post_multipart(
    uri: &str,
    field: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            BOUNDARY, field, filename, content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::post(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Read full response body bytes.
async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

/// Parse an SSE body into `(event, data)` pairs, skipping keep-alive comments.
fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut event = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = Some(serde_json::from_str(rest.trim()).unwrap());
                }
            }
            Some((event?, data?))
        })
        .collect()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_reports_components() {
    let app = TestApp::new();
    let resp = app.send(get("/api/health")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let health: HealthResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.database, "connected");
    assert_eq!(health.openai, "not_configured");
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let app = TestApp::new();
    let resp = app.send(get("/health")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Agents
// =============================================================================

#[tokio::test]
async fn test_agent_crud() {
    let app = TestApp::new();
    let id = app.create_agent("Support", "You are helpful.").await;

    let (status, json) = app.json(get(&format!("/api/agents/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Support");
    assert_eq!(json["system_prompt"], "You are helpful.");
    assert_eq!(json["session_count"], 0);

    let (status, json) = app
        .json(put_json(
            &format!("/api/agents/{}", id),
            r#"{"name": "Renamed"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Renamed");
    assert_eq!(json["system_prompt"], "You are helpful.");

    let (status, json) = app.json(get("/api/agents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["agents"][0]["name"], "Renamed");

    let resp = app.send(delete(&format!("/api/agents/{}", id))).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let (status, json) = app.json(get(&format!("/api/agents/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["message"], "Agent not found");
}

#[tokio::test]
async fn test_agent_validation() {
    let app = TestApp::new();
    let long_name = "x".repeat(101);
    let cases = [
        serde_json::json!({ "name": "", "system_prompt": "p" }),
        serde_json::json!({ "name": long_name, "system_prompt": "p" }),
        serde_json::json!({ "name": "ok", "system_prompt": "  " }),
    ];
    for body in cases {
        let (status, _) = app.json(post_json("/api/agents", &body.to_string())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "body: {}", body);
    }

    let (status, _) = app
        .json(put_json(
            &format!("/api/agents/{}", Uuid::new_v4()),
            r#"{"name": "x"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let resp = app.send(delete(&format!("/api/agents/{}", Uuid::new_v4()))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refine_prompt() {
    let chat = ScriptedChatModel::with_scripts([Script::reply("You are a patient tutor.")]);
    let app = TestApp::with_chat(Arc::new(chat));

    let (status, json) = app
        .json(post_json(
            "/api/agents/refine",
            r#"{"description": "math tutor for kids"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["system_prompt"], "You are a patient tutor.");

    let (status, _) = app
        .json(post_json("/api/agents/refine", r#"{"description": "hi"}"#))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_refine_prompt_upstream_failure() {
    let chat =
        ScriptedChatModel::with_scripts([Script::Fail(LlmError::Http("unreachable".into()))]);
    let app = TestApp::with_chat(Arc::new(chat));

    let (status, json) = app
        .json(post_json(
            "/api/agents/refine",
            r#"{"description": "a travel planner"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("Failed to refine prompt"));
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn test_session_lifecycle() {
    let app = TestApp::new();
    let agent_id = app.create_agent("Helper", "You are helpful.").await;

    let (status, json) = app
        .json(post_json(
            &format!("/api/agents/{}/sessions", agent_id),
            r#"{"title": "Planning"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["title"], "Planning");
    let titled = json["id"].as_str().unwrap().to_string();

    let untitled = app.create_session(&agent_id).await;

    let (status, json) = app
        .json(get(&format!("/api/agents/{}/sessions", agent_id)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);

    let (status, json) = app.json(get(&format!("/api/sessions/{}", untitled))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["title"], Value::Null);
    assert_eq!(json["message_count"], 0);
    assert_eq!(json["agent"]["name"], "Helper");
    assert_eq!(json["agent"]["session_count"], 2);
    assert_eq!(json["messages"].as_array().unwrap().len(), 0);

    let resp = app.send(delete(&format!("/api/sessions/{}", titled))).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = app.send(delete(&format!("/api/sessions/{}", titled))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_errors() {
    let app = TestApp::new();
    let missing = Uuid::new_v4();

    let (status, _) = app
        .json(post_empty(&format!("/api/agents/{}/sessions", missing)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.json(get(&format!("/api/sessions/{}", missing))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let agent_id = app.create_agent("A", "p").await;
    let body = serde_json::json!({ "title": "t".repeat(201) });
    let (status, _) = app
        .json(post_json(
            &format!("/api/agents/{}/sessions", agent_id),
            &body.to_string(),
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// =============================================================================
// Chat stream
// =============================================================================

#[tokio::test]
async fn test_chat_stream_persists_turn() {
    let app = TestApp::new();
    let agent_id = app.create_agent("Helper", "You are helpful.").await;
    let session_id = app.create_session(&agent_id).await;

    let resp = app
        .send(post_json(
            &format!("/api/sessions/{}/messages", session_id),
            r#"{"content": "Hello"}"#,
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = String::from_utf8(body_bytes(resp).await).unwrap();
    let events = parse_sse(&body);
    let (last_name, last_data) = events.last().unwrap();
    assert_eq!(last_name, "done");
    assert_eq!(last_data["full_content"], "You said: Hello");

    let streamed: String = events
        .iter()
        .filter(|(name, _)| name == "token")
        .map(|(_, data)| data["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(streamed, "You said: Hello");

    let (status, json) = app
        .json(get(&format!("/api/sessions/{}/messages", session_id)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_count"], 2);
    assert_eq!(json["has_more"], false);
    assert_eq!(json["messages"][0]["role"], "user");
    assert_eq!(json["messages"][0]["content"], "Hello");
    assert_eq!(json["messages"][1]["role"], "assistant");
    assert_eq!(json["messages"][1]["id"], last_data["message_id"]);

    let (_, json) = app.json(get(&format!("/api/sessions/{}", session_id))).await;
    assert_eq!(json["title"], "Hello");
}

#[tokio::test]
async fn test_chat_stream_rate_limit_fallback() {
    let chat = ScriptedChatModel::with_scripts([Script::Fail(LlmError::Stream(
        "rate_limit_exceeded: slow down".into(),
    ))]);
    let app = TestApp::with_chat(Arc::new(chat));
    let agent_id = app.create_agent("Helper", "You are helpful.").await;
    let session_id = app.create_session(&agent_id).await;

    let resp = app
        .send(post_json(
            &format!("/api/sessions/{}/messages", session_id),
            r#"{"content": "Hi"}"#,
        ))
        .await;
    let body = String::from_utf8(body_bytes(resp).await).unwrap();
    let events = parse_sse(&body);
    assert_eq!(events.len(), 1);
    let (name, data) = &events[0];
    assert_eq!(name, "error");
    let fallback = "I'm receiving too many requests. Please wait a moment and try again.";
    assert_eq!(data["fallback_message"], fallback);
    assert!(data["error"].as_str().unwrap().contains("rate_limit"));

    let (_, json) = app
        .json(get(&format!("/api/sessions/{}/messages", session_id)))
        .await;
    assert_eq!(json["messages"][1]["content"], fallback);
}

#[tokio::test]
async fn test_chat_rejects_invalid_messages() {
    let app = TestApp::new();
    let agent_id = app.create_agent("Helper", "p").await;
    let session_id = app.create_session(&agent_id).await;
    let uri = format!("/api/sessions/{}/messages", session_id);

    let (status, _) = app.json(post_json(&uri, r#"{"content": "   "}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = serde_json::json!({ "content": "x".repeat(10_001) });
    let (status, _) = app.json(post_json(&uri, &body.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(post_json(
            &format!("/api/sessions/{}/messages", Uuid::new_v4()),
            r#"{"content": "hello"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_message_pagination() {
    let app = TestApp::new();
    let agent_id = app.create_agent("Helper", "p").await;
    let session_id = app.create_session(&agent_id).await;
    let uri = format!("/api/sessions/{}/messages", session_id);

    for i in 0..3 {
        let body = serde_json::json!({ "content": format!("message {}", i) });
        let resp = app.send(post_json(&uri, &body.to_string())).await;
        body_bytes(resp).await;
    }

    let (status, json) = app.json(get(&format!("{}?limit=2", uri))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_count"], 6);
    assert_eq!(json["has_more"], true);
    let page = json["messages"].as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["content"], "message 2");

    let cursor = page[0]["id"].as_str().unwrap();
    let (_, json) = app
        .json(get(&format!("{}?limit=2&before={}", uri, cursor)))
        .await;
    let older = json["messages"].as_array().unwrap();
    assert_eq!(older.len(), 2);
    assert_eq!(older[1]["content"], "You said: message 1");

    let (status, _) = app.json(get(&format!("{}?limit=0", uri))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, _) = app.json(get(&format!("{}?limit=101", uri))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// =============================================================================
// Voice and audio
// =============================================================================

#[tokio::test]
async fn test_voice_turn_and_audio_serving() {
    let chat = ScriptedChatModel::with_scripts([Script::reply("Spoken answer.")]);
    let app = TestApp::with_chat(Arc::new(chat));
    let agent_id = app.create_agent("Voice", "Speak briefly.").await;
    let session_id = app.create_session(&agent_id).await;

    let (status, json) = app
        .json(post_multipart(
            &format!("/api/sessions/{}/voice", session_id),
            "audio",
            "recording.webm",
            "audio/webm",
            b"fake-webm-bytes",
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user_message"]["message_type"], "voice");
    assert_eq!(json["user_message"]["content"], "[mock transcription]");
    assert_eq!(json["assistant_message"]["content"], "Spoken answer.");

    let audio_url = json["user_message"]["audio_url"].as_str().unwrap();
    assert!(audio_url.starts_with("/api/audio/uploads/"));
    let resp = app.send(get(audio_url)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "audio/webm");
    assert_eq!(body_bytes(resp).await, b"fake-webm-bytes");

    let tts_url = json["assistant_message"]["tts_audio_url"].as_str().unwrap();
    let resp = app.send(get(tts_url)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "audio/mpeg");
}

#[tokio::test]
async fn test_voice_validation() {
    let app = TestApp::new();
    let agent_id = app.create_agent("Voice", "p").await;
    let session_id = app.create_session(&agent_id).await;
    let uri = format!("/api/sessions/{}/voice", session_id);

    let (status, _) = app
        .json(post_multipart(&uri, "audio", "a.webm", "audio/webm", b""))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let oversized = vec![0u8; 5 * 1024 * 1024 + 1];
    let (status, _) = app
        .json(post_multipart(&uri, "audio", "a.mp3", "audio/mpeg", &oversized))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(post_multipart(&uri, "other", "a.mp3", "audio/mpeg", b"x"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(post_multipart(
            &format!("/api/sessions/{}/voice", Uuid::new_v4()),
            "audio",
            "a.mp3",
            "audio/mpeg",
            b"x",
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_audio_serving_rejects_unknown_paths() {
    let app = TestApp::new();
    for uri in [
        "/api/audio/uploads/missing.webm",
        "/api/audio/secrets/file.mp3",
        "/api/audio/tts/..%2F..%2Fetc%2Fpasswd",
    ] {
        let resp = app.send(get(uri)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "uri: {}", uri);
    }
}

// =============================================================================
// Documents
// =============================================================================

#[tokio::test]
async fn test_document_upload_list_delete() {
    let app = TestApp::new();
    let agent_id = app.create_agent("Docs", "Answer from the docs.").await;
    let text = "The warranty covers parts and labour for two years. ".repeat(100);

    let (status, json) = app
        .json(post_multipart(
            &format!("/api/agents/{}/documents", agent_id),
            "file",
            "warranty.txt",
            "text/plain",
            text.as_bytes(),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Document uploaded and processed successfully");
    assert_eq!(json["document"]["filename"], "warranty.txt");
    let chunk_count = json["chunk_count"].as_u64().unwrap();
    assert!(chunk_count >= 2);
    assert_eq!(json["document"]["chunk_count"], chunk_count);
    let document_id = json["document"]["id"].as_str().unwrap().to_string();

    let (status, json) = app
        .json(get(&format!("/api/agents/{}/documents", agent_id)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);

    let (status, json) = app
        .json(delete(&format!("/api/documents/{}", document_id)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["document_id"], document_id);

    let (status, _) = app
        .json(delete(&format!("/api/documents/{}", document_id)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_document_upload_validation() {
    let app = TestApp::new();
    let agent_id = app.create_agent("Docs", "p").await;
    let uri = format!("/api/agents/{}/documents", agent_id);

    let (status, json) = app
        .json(post_multipart(&uri, "file", "report.docx", "application/octet-stream", b"data"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["message"].as_str().unwrap().contains("Unsupported file type"));

    let (status, _) = app
        .json(post_multipart(&uri, "file", "empty.txt", "text/plain", b""))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(post_multipart(&uri, "file", "blank.md", "text/markdown", b"   \n\n  "))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(post_multipart(
            &format!("/api/agents/{}/documents", Uuid::new_v4()),
            "file",
            "a.txt",
            "text/plain",
            b"text",
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = app.json(get(&uri)).await;
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn test_agent_delete_cascades() {
    let app = TestApp::new();
    let agent_id = app.create_agent("Cascade", "p").await;
    let session_id = app.create_session(&agent_id).await;
    let resp = app
        .send(post_json(
            &format!("/api/sessions/{}/messages", session_id),
            r#"{"content": "remember me"}"#,
        ))
        .await;
    body_bytes(resp).await;
    let (status, json) = app
        .json(post_multipart(
            &format!("/api/agents/{}/documents", agent_id),
            "file",
            "notes.md",
            "text/markdown",
            b"# Notes\n\nSome content worth keeping.",
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let document_id = json["document"]["id"].as_str().unwrap().to_string();

    let resp = app.send(delete(&format!("/api/agents/{}", agent_id))).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let (status, _) = app.json(get(&format!("/api/sessions/{}", session_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .json(delete(&format!("/api/documents/{}", document_id)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let agent_uuid: Uuid = agent_id.parse().unwrap();
    assert_eq!(
        app.state.documents.chunk_count_for_agent(agent_uuid).unwrap(),
        0
    );
}
