//! Message endpoints: transcript reads, synchronous sends, async submits

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde::Deserialize;

use vocalbridge_core::{
    Error,
    store::{ConversationStore, JobStore, NewJob},
    types::{JobType, Message, SessionId},
};
use vocalbridge_pipeline::{MessageInput, MessageReply};

use crate::app::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::handlers::err;
use crate::middleware::CorrelationId;

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

const DEFAULT_JOB_MAX_ATTEMPTS: i32 = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncMessageRequest {
    pub content: String,
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// The POST-message success shape: the assistant message flattened, plus the
/// dispatch metadata bundle.
pub(crate) fn reply_body(reply: &MessageReply) -> serde_json::Value {
    let mut body = serde_json::to_value(&reply.message).unwrap_or_default();
    body["metadata"] = serde_json::to_value(&reply.metadata).unwrap_or_default();
    body
}

fn transcript_body(messages: Vec<Message>) -> serde_json::Value {
    serde_json::json!({ "messages": messages })
}

pub async fn list(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<SessionId>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Tenant scope check before touching the transcript.
    state
        .sessions
        .get(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    let messages = state
        .store
        .list_messages(id, query.limit.clamp(1, 500))
        .await
        .map_err(err(&correlation))?;
    Ok(Json(transcript_body(messages)))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<SessionId>,
    headers: HeaderMap,
    Json(body): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.content.trim().is_empty() {
        return Err(err(&correlation)(Error::Validation(
            "content must not be empty".to_string(),
        )));
    }

    let reply = state
        .pipeline
        .send_message(
            auth.tenant_id,
            id,
            MessageInput {
                content: body.content,
                idempotency_key: idempotency_key(&headers),
                correlation_id: Some(correlation.0.clone()),
                audio_artifact_id: None,
            },
        )
        .await
        .map_err(err(&correlation))?;

    Ok((StatusCode::CREATED, Json(reply_body(&reply))))
}

/// Fire-and-forget submission: the message is enqueued as a durable job and
/// executed by the worker fleet.
pub async fn create_async(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<SessionId>,
    headers: HeaderMap,
    Json(body): Json<AsyncMessageRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.content.trim().is_empty() {
        return Err(err(&correlation)(Error::Validation(
            "content must not be empty".to_string(),
        )));
    }
    // Fail fast on a bad session rather than burning job attempts.
    state
        .sessions
        .get(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;

    let job = state
        .store
        .enqueue_job(NewJob {
            tenant_id: auth.tenant_id,
            job_type: JobType::SendMessage,
            idempotency_key: idempotency_key(&headers),
            input: serde_json::json!({
                "sessionId": id,
                "content": body.content,
                "correlationId": correlation.0,
            }),
            callback_url: body.callback_url,
            max_attempts: DEFAULT_JOB_MAX_ATTEMPTS,
        })
        .await
        .map_err(err(&correlation))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "jobId": job.id,
            "status": job.status,
        })),
    ))
}
