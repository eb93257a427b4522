//! API handlers for the Kuber agent worker.

use crate::entrypoint::SessionLaunch;
use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Extension, Json, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use kuber_types::NO_HISTORY_SENTINEL;
use kuber_voice::VoiceError;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Agent replies are raw 24 kHz s16le mono PCM.
const REPLY_AUDIO_CONTENT_TYPE: &str = "audio/L16; rate=24000; channels=1";

/// Request body for starting a voice session. The body may be omitted.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Display name for the caller's LiveKit participant.
    #[serde(default)]
    pub participant_name: Option<String>,
}

/// Everything a client needs to join the session's room.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub room_name: String,
    /// LiveKit URL the client connects to.
    pub url: String,
    /// Participant join token.
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub history: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub session_id: String,
    pub ended: bool,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("upstream failure: {0}")]
    BadGateway(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Handler for `POST /api/sessions`.
pub async fn create_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    if !state.voice_service.is_enabled() {
        return Err(ApiError::ServiceUnavailable(
            "voice is not configured; set livekit.url, livekit.api_key and livekit.api_secret"
                .to_string(),
        ));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let launch = SessionLaunch::for_session(session_id.clone());

    if let Err(e) = state.voice_service.create_room(&launch.room_name).await {
        // The agent joining creates the room anyway.
        tracing::warn!(
            session_id = %session_id,
            room = %launch.room_name,
            error = %e,
            "failed to create LiveKit room"
        );
    }

    let participant_name = request
        .participant_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "Guest".to_string());
    let token = state
        .voice_service
        .generate_join_token(
            &launch.room_name,
            &format!("caller-{session_id}"),
            &participant_name,
        )
        .map_err(|e| {
            tracing::error!(session_id = %session_id, error = %e, "failed to generate LiveKit token");
            ApiError::InternalServerError("failed to generate voice token".to_string())
        })?;

    let response = CreateSessionResponse {
        session_id,
        room_name: launch.room_name.clone(),
        url: state.voice_service.public_url().to_string(),
        token,
    };
    state.registry.launch(launch);

    tracing::info!(session_id = %response.session_id, "session created");
    Ok(Json(response))
}

/// Handler for `POST /api/sessions/{session_id}/speech`.
///
/// The body is raw 16 kHz s16le mono PCM from the caller.
pub async fn speech_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let room_name = state
        .registry
        .room_for(&session_id)
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))?;

    match state.runtime.hear(&room_name, &body, "caller").await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(VoiceError::RoomNotFound(_)) | Err(VoiceError::NotConnected(_)) => Err(
            ApiError::Conflict(format!("session {session_id} is not connected")),
        ),
        Err(e @ VoiceError::Stt(_)) => Err(ApiError::BadGateway(e.to_string())),
        Err(e) => Err(ApiError::InternalServerError(e.to_string())),
    }
}

/// Handler for `GET /api/sessions/{session_id}/audio`.
///
/// Streams the agent's spoken replies as they are synthesised. The body ends
/// when the agent leaves the room.
pub async fn audio_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let room_name = state
        .registry
        .room_for(&session_id)
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))?;

    let frames = match state.runtime.listen(&room_name) {
        Ok(frames) => frames,
        Err(VoiceError::RoomNotFound(_)) | Err(VoiceError::NotConnected(_)) => {
            return Err(ApiError::Conflict(format!(
                "session {session_id} is not connected"
            )))
        }
        Err(e) => return Err(ApiError::InternalServerError(e.to_string())),
    };

    let stream = BroadcastStream::new(frames).filter_map(move |frame| match frame {
        Ok(pcm) => Some(Ok::<_, Infallible>(Bytes::copy_from_slice(&pcm))),
        Err(e) => {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "audio listener lagged; reply audio was dropped"
            );
            None
        }
    });

    Ok((
        [(header::CONTENT_TYPE, REPLY_AUDIO_CONTENT_TYPE)],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Handler for `GET /api/sessions/{session_id}/history`.
///
/// Reads without creating: a live session whose messages are no longer held
/// in memory reports no history.
pub async fn history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = match state.tools.peek_conversation_history(&session_id) {
        Some(history) => history,
        None if state.registry.contains(&session_id) => NO_HISTORY_SENTINEL.to_string(),
        None => return Err(ApiError::NotFound(format!("session {session_id}"))),
    };

    Ok(Json(HistoryResponse {
        session_id,
        history,
    }))
}

/// Handler for `DELETE /api/sessions/{session_id}`.
///
/// Returns once the session's terminal save has completed.
pub async fn end_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<EndSessionResponse>, ApiError> {
    let room_name = state.registry.room_for(&session_id);
    if !state.registry.end(&session_id).await {
        return Err(ApiError::NotFound(format!("session {session_id}")));
    }

    if let Some(room) = room_name {
        if let Err(e) = state.voice_service.delete_room(&room).await {
            tracing::debug!(session_id = %session_id, error = %e, "failed to delete LiveKit room");
        }
    }

    Ok(Json(EndSessionResponse {
        session_id,
        ended: true,
    }))
}
