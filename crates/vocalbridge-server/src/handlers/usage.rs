//! Usage analytics

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use vocalbridge_core::store::{BillingStore, UsageGroupBy, UsageWindow};

use crate::app::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::handlers::err;
use crate::middleware::CorrelationId;

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct BreakdownQuery {
    #[serde(rename = "groupBy")]
    pub group_by: UsageGroupBy,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TopAgentsQuery {
    #[serde(default = "default_top_limit")]
    pub limit: i64,
}

fn default_top_limit() -> i64 {
    5
}

pub async fn totals(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let totals = state
        .store
        .usage_totals(
            auth.tenant_id,
            UsageWindow {
                from: query.from,
                to: query.to,
            },
        )
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!(totals)))
}

pub async fn breakdown(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<BreakdownQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let buckets = state
        .store
        .usage_breakdown(
            auth.tenant_id,
            query.group_by,
            UsageWindow {
                from: query.from,
                to: query.to,
            },
        )
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!({ "breakdown": buckets })))
}

pub async fn top_agents(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<TopAgentsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agents = state
        .store
        .top_agents(auth.tenant_id, query.limit.clamp(1, 100))
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!({ "agents": agents })))
}
