//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, per-route
//! upload limits and all endpoint handlers, nested under the API prefix.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use colloquy_core::config::ColloquyConfig;
use colloquy_core::error::ColloquyError;

use crate::handlers;
use crate::state::AppState;

/// Headroom for multipart framing on top of the file size limits.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_TYPE])
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let voice_limit = state.config.chat.max_audio_bytes + MULTIPART_OVERHEAD;
    let upload_limit = state.config.rag.max_upload_bytes + MULTIPART_OVERHEAD;
    let cors = cors_layer(&state.config.general.cors_origins);
    let prefix = state.config.general.api_prefix.trim_end_matches('/').to_string();

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/agents",
            get(handlers::list_agents).post(handlers::create_agent),
        )
        .route("/agents/refine", post(handlers::refine_prompt))
        .route(
            "/agents/{id}",
            get(handlers::get_agent)
                .put(handlers::update_agent)
                .delete(handlers::delete_agent),
        )
        .route(
            "/agents/{id}/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/agents/{id}/documents",
            get(handlers::list_documents).post(handlers::upload_document).layer(
                DefaultBodyLimit::max(upload_limit),
            ),
        )
        .route("/documents/{id}", delete(handlers::delete_document))
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/sessions/{id}/messages",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route(
            "/sessions/{id}/voice",
            post(handlers::send_voice).layer(DefaultBodyLimit::max(voice_limit)),
        )
        .route("/audio/{folder}/{filename}", get(handlers::get_audio));

    let router = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&prefix, api)
    };

    router
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB for JSON bodies
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured host and port.
pub async fn start_server(config: &ColloquyConfig, state: AppState) -> Result<(), ColloquyError> {
    let addr = format!("{}:{}", config.general.host, config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ColloquyError::Config(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router).await.map_err(ColloquyError::Io)?;

    Ok(())
}
