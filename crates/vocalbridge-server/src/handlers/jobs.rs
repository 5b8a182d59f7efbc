//! Async job status

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use vocalbridge_core::store::JobStore;

use crate::app::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::handlers::err;
use crate::middleware::CorrelationId;

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

pub async fn get_one(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state
        .store
        .get_job(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!(job)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let jobs = state
        .store
        .list_jobs(auth.tenant_id, query.limit.clamp(1, 200), query.offset.max(0))
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!({ "jobs": jobs })))
}
