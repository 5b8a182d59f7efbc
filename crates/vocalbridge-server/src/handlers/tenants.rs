//! Tenant signup and self-inspection

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use vocalbridge_core::{Error, store::TenantStore, types::ApiKeyRole};

use crate::app::AppState;
use crate::auth::{AuthContext, generate_key};
use crate::error::ApiError;
use crate::handlers::err;
use crate::middleware::CorrelationId;

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub email: String,
}

/// Create a tenant and its first ADMIN key. The plaintext key appears in
/// this response and nowhere else, ever.
pub async fn create_tenant(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(body): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.name.trim().is_empty() || !body.email.contains('@') {
        return Err(err(&correlation)(Error::Validation(
            "name and a valid email are required".to_string(),
        )));
    }

    let tenant = state
        .store
        .create_tenant(body.name.trim(), body.email.trim())
        .await
        .map_err(err(&correlation))?;

    let (plaintext, display_prefix, hash) = generate_key(&state.api_key_prefix);
    let key = state
        .store
        .create_api_key(tenant.id, &display_prefix, &hash, ApiKeyRole::Admin, None)
        .await
        .map_err(err(&correlation))?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "tenant": tenant,
            "apiKey": plaintext,
            "apiKeyId": key.id,
        })),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant = state
        .store
        .get_tenant(auth.tenant_id)
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::to_value(tenant).map_err(|e| {
        err(&correlation)(Error::Serialization(e))
    })?))
}
