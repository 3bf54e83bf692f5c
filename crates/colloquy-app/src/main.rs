//! Colloquy application binary - composition root.
//!
//! Ties together all Colloquy crates into a single executable:
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Initialize logging
//! 3. Open the SQLite database under the data directory
//! 4. Construct the AI collaborators (OpenAI or offline mocks)
//! 5. Start the axum REST API server

mod cli;

use std::path::PathBuf;

use clap::Parser;

use colloquy_api::{AiServices, AppState};
use colloquy_core::config::ColloquyConfig;
use colloquy_storage::Database;

use cli::CliArgs;

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ColloquyConfig::load_or_default(&config_file);
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Colloquy v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    config.general.port = args.resolve_port(config.general.port);
    config.general.host = args.resolve_host(&config.general.host);
    config.openai.api_key = cli::resolve_api_key(&config.openai.api_key);
    config.validate()?;

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    config.general.data_dir = data_dir.to_string_lossy().to_string();

    let db_path = data_dir.join("colloquy.db");
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // AI collaborators.
    let services = if args.mock_ai {
        tracing::warn!("Using mock AI services; replies are echoes and embeddings are hashes");
        AiServices::mock()
    } else {
        if !config.openai.is_configured() {
            tracing::warn!(
                "OPENAI_API_KEY is not set; AI calls will fail and chat turns will return fallbacks. \
                 Pass --mock-ai to run offline"
            );
        }
        AiServices::openai(&config)?
    };
    tracing::info!(
        chat_model = %config.openai.chat_model,
        embedding_model = %config.openai.embedding_model,
        mock = args.mock_ai,
        "AI services ready"
    );

    // API server.
    let state = AppState::new(config.clone(), db, services);
    colloquy_api::start_server(&config, state).await?;

    Ok(())
}
