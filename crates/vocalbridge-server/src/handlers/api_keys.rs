//! API key management (ADMIN)

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use vocalbridge_core::store::TenantStore;
use vocalbridge_core::types::ApiKeyRole;

use crate::app::AppState;
use crate::auth::{AuthContext, generate_key};
use crate::error::ApiError;
use crate::handlers::err;
use crate::middleware::CorrelationId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    pub role: ApiKeyRole,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let keys = state
        .store
        .list_api_keys(auth.tenant_id)
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!({ "apiKeys": keys })))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    auth.require_admin().map_err(err(&correlation))?;

    let (plaintext, display_prefix, hash) = generate_key(&state.api_key_prefix);
    let key = state
        .store
        .create_api_key(
            auth.tenant_id,
            &display_prefix,
            &hash,
            body.role,
            body.expires_at,
        )
        .await
        .map_err(err(&correlation))?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "apiKey": key, "plaintext": plaintext })),
    ))
}

pub async fn revoke(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_admin().map_err(err(&correlation))?;
    let key = state
        .store
        .revoke_api_key(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!({ "apiKey": key })))
}

/// Revoke a key and mint its replacement with the same role in one call.
pub async fn rotate(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_admin().map_err(err(&correlation))?;

    let revoked = state
        .store
        .revoke_api_key(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;

    let (plaintext, display_prefix, hash) = generate_key(&state.api_key_prefix);
    let replacement = state
        .store
        .create_api_key(
            auth.tenant_id,
            &display_prefix,
            &hash,
            revoked.role,
            revoked.expires_at,
        )
        .await
        .map_err(err(&correlation))?;

    Ok(Json(serde_json::json!({
        "revoked": revoked,
        "apiKey": replacement,
        "plaintext": plaintext,
    })))
}
