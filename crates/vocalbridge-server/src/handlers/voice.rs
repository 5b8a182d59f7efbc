//! Voice passthrough and audio artifact storage
//!
//! Speech transcription happens client-side; the core treats a voice message
//! as plain text plus an opaque stored audio artifact.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use vocalbridge_core::{
    Error,
    store::{ConversationStore, NewAudioArtifact},
    types::{AudioArtifactType, SessionId},
};
use vocalbridge_pipeline::MessageInput;

use crate::app::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::handlers::err;
use crate::handlers::messages::{idempotency_key, reply_body};
use crate::middleware::CorrelationId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRequest {
    pub transcript: String,
    pub duration_ms: Option<i64>,
    pub format: Option<String>,
    pub sample_rate: Option<i32>,
    pub provider: Option<String>,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreAudioQuery {
    #[serde(default = "default_artifact_type")]
    pub artifact_type: AudioArtifactType,
    pub format: Option<String>,
    pub sample_rate: Option<i32>,
    pub duration_ms: Option<i64>,
}

fn default_artifact_type() -> AudioArtifactType {
    AudioArtifactType::UserInput
}

/// Accept a client-side transcript, record the audio artifact, and run the
/// text through the ordinary message pipeline.
pub async fn transcript(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<SessionId>,
    headers: HeaderMap,
    Json(body): Json<TranscriptRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.transcript.trim().is_empty() {
        return Err(err(&correlation)(Error::Validation(
            "transcript must not be empty".to_string(),
        )));
    }
    // Tenant scope check before any writes.
    state
        .sessions
        .get(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;

    let artifact = state
        .store
        .insert_audio_artifact(NewAudioArtifact {
            session_id: id,
            artifact_type: AudioArtifactType::UserInput,
            file_path: None,
            file_size: None,
            duration_ms: body.duration_ms,
            format: body.format,
            sample_rate: body.sample_rate,
            provider: body.provider,
            transcript: Some(body.transcript.clone()),
            latency_ms: body.latency_ms,
        })
        .await
        .map_err(err(&correlation))?;

    let reply = state
        .pipeline
        .send_message(
            auth.tenant_id,
            id,
            MessageInput {
                content: body.transcript,
                idempotency_key: idempotency_key(&headers),
                correlation_id: Some(correlation.0.clone()),
                audio_artifact_id: Some(artifact.id),
            },
        )
        .await
        .map_err(err(&correlation))?;

    let mut body = reply_body(&reply);
    body["audioArtifactId"] = serde_json::json!(artifact.id);
    Ok((StatusCode::CREATED, Json(body)))
}

/// Store raw audio bytes for a session. With no storage directory configured
/// only the metadata row is recorded.
pub async fn store_audio(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<SessionId>,
    Query(query): Query<StoreAudioQuery>,
    bytes: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    state
        .sessions
        .get(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;

    let mut file_path = None;
    if let Some(dir) = &state.audio_storage_dir
        && !bytes.is_empty()
    {
        let extension = query.format.as_deref().unwrap_or("bin");
        let path = format!("{}/{}.{}", dir, Uuid::new_v4(), extension);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| err(&correlation)(Error::Internal(format!("audio dir: {}", e))))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| err(&correlation)(Error::Internal(format!("audio write: {}", e))))?;
        file_path = Some(path);
    }

    let artifact = state
        .store
        .insert_audio_artifact(NewAudioArtifact {
            session_id: id,
            artifact_type: query.artifact_type,
            file_path,
            file_size: Some(bytes.len() as i64),
            duration_ms: query.duration_ms,
            format: query.format,
            sample_rate: query.sample_rate,
            provider: None,
            transcript: None,
            latency_ms: None,
        })
        .await
        .map_err(err(&correlation))?;

    Ok((StatusCode::CREATED, Json(serde_json::json!(artifact))))
}

/// Stream the stored audio bytes back.
pub async fn fetch_audio(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path((id, artifact_id)): Path<(SessionId, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .sessions
        .get(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    let artifact = state
        .store
        .get_audio_artifact(id, artifact_id)
        .await
        .map_err(err(&correlation))?;

    let path = artifact
        .file_path
        .ok_or_else(|| err(&correlation)(Error::NotFound("audio file".to_string())))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| err(&correlation)(Error::NotFound("audio file".to_string())))?;

    let content_type = match artifact.format.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

pub async fn metadata(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path((id, artifact_id)): Path<(SessionId, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .sessions
        .get(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    let artifact = state
        .store
        .get_audio_artifact(id, artifact_id)
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!(artifact)))
}
