//! Kuber voice finance agent: tools, session lifecycle and the HTTP worker.

pub mod api;
pub mod config;
pub mod entrypoint;
pub mod instructions;
pub mod tools;
pub mod worker;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use config::Config;
use kuber_search::{SearchChain, SearchError};
use kuber_session::{JsonFileWriter, SessionStore};
use kuber_voice::{
    ChatClient, ConversationRuntime, SttService, TtsService, VoiceError, VoicePipeline,
    VoiceService,
};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tools::FinanceTools;
use tower_http::trace::TraceLayer;
use worker::SessionRegistry;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The four agent tools and the session store behind them.
    pub tools: Arc<FinanceTools>,
    /// LiveKit rooms and join tokens.
    pub voice_service: Arc<VoiceService>,
    /// Runtime that holds conversations.
    pub runtime: Arc<dyn ConversationRuntime>,
    /// Running sessions.
    pub registry: Arc<SessionRegistry>,
}

/// Errors building the application from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("search setup failed: {0}")]
    Search(#[from] SearchError),
    #[error("voice setup failed: {0}")]
    Voice(#[from] VoiceError),
}

impl AppState {
    /// Wires `runtime` to a registry over `tools`.
    pub fn new(
        tools: Arc<FinanceTools>,
        voice_service: Arc<VoiceService>,
        runtime: Arc<dyn ConversationRuntime>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&runtime),
            Arc::clone(&tools),
        ));
        Self {
            tools,
            voice_service,
            runtime,
            registry,
        }
    }

    /// Builds the production state: JSON session files, DuckDuckGo search
    /// and the OpenAI/LiveKit voice pipeline.
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let writer = Arc::new(JsonFileWriter::new(&config.sessions.dir));
        let store = Arc::new(SessionStore::new(
            writer,
            config.sessions.store_settings(),
        ));
        let search = Arc::new(SearchChain::from_config(&config.search)?);
        let tools = Arc::new(FinanceTools::new(
            store,
            search,
            config.sessions.history_limit,
        ));

        let voice_service = Arc::new(VoiceService::new(config.livekit.clone()));
        let pipeline = VoicePipeline::new(
            Arc::clone(&voice_service),
            Arc::new(SttService::new(&config.openai)?),
            Arc::new(TtsService::new(&config.openai)?),
            Arc::new(ChatClient::new(&config.openai)?),
        );

        Ok(Self::new(tools, voice_service, Arc::new(pipeline)))
    }
}

/// Maximum request body size (2 MiB). Bounds speech uploads.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(api::create_session_handler))
        .route(
            "/api/sessions/{session_id}",
            delete(api::end_session_handler),
        )
        .route(
            "/api/sessions/{session_id}/speech",
            post(api::speech_handler),
        )
        .route(
            "/api/sessions/{session_id}/audio",
            get(api::audio_handler),
        )
        .route(
            "/api/sessions/{session_id}/history",
            get(api::history_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
