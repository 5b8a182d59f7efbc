//! Session endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use vocalbridge_core::types::{Channel, SessionId};

use crate::app::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::handlers::err;
use crate::middleware::CorrelationId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub agent_id: Uuid,
    pub customer_id: String,
    #[serde(default = "default_channel")]
    pub channel: Channel,
    pub metadata: Option<serde_json::Value>,
}

fn default_channel() -> Channel {
    Channel::Chat
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn create(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let session = state
        .sessions
        .create(
            auth.tenant_id,
            body.agent_id,
            body.customer_id,
            body.channel,
            body.metadata,
        )
        .await
        .map_err(err(&correlation))?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(session))))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<SessionId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state
        .sessions
        .get(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!(session)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sessions = state
        .sessions
        .list(auth.tenant_id, query.limit.clamp(1, 200), query.offset.max(0))
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

pub async fn end(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<SessionId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state
        .sessions
        .end(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!(session)))
}
