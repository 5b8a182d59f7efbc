//! Agent CRUD and demo sessions

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use vocalbridge_core::{
    Error,
    store::{AgentStore, AgentUpdate, NewAgent},
    types::ProviderId,
};

use crate::app::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::handlers::err;
use crate::middleware::CorrelationId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub name: String,
    pub description: Option<String>,
    pub primary_provider: ProviderId,
    pub fallback_provider: Option<ProviderId>,
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default)]
    pub voice_enabled: bool,
    pub voice_config: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub primary_provider: Option<ProviderId>,
    pub fallback_provider: Option<Option<ProviderId>>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub enabled_tools: Option<Vec<String>>,
    pub voice_enabled: Option<bool>,
    pub voice_config: Option<Option<serde_json::Value>>,
    pub is_active: Option<bool>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn validate_generation_knobs(temperature: f32, max_tokens: u32) -> Result<(), Error> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(Error::Validation(
            "temperature must be between 0 and 2".to_string(),
        ));
    }
    if !(1..=4096).contains(&max_tokens) {
        return Err(Error::Validation(
            "maxTokens must be between 1 and 4096".to_string(),
        ));
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    auth.require_admin().map_err(err(&correlation))?;
    if body.name.trim().is_empty() || body.system_prompt.trim().is_empty() {
        return Err(err(&correlation)(Error::Validation(
            "name and systemPrompt are required".to_string(),
        )));
    }
    validate_generation_knobs(body.temperature, body.max_tokens).map_err(err(&correlation))?;

    let agent = state
        .store
        .create_agent(NewAgent {
            tenant_id: auth.tenant_id,
            name: body.name,
            description: body.description,
            primary_provider: body.primary_provider,
            fallback_provider: body.fallback_provider,
            system_prompt: body.system_prompt,
            temperature: body.temperature,
            max_tokens: body.max_tokens,
            enabled_tools: body.enabled_tools,
            voice_enabled: body.voice_enabled,
            voice_config: body.voice_config,
        })
        .await
        .map_err(err(&correlation))?;

    Ok((StatusCode::CREATED, Json(serde_json::json!(agent))))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agents = state
        .store
        .list_agents(auth.tenant_id)
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!({ "agents": agents })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent = state
        .store
        .get_agent(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    Ok(Json(serde_json::json!(agent)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAgentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_admin().map_err(err(&correlation))?;
    if let Some(temperature) = body.temperature {
        validate_generation_knobs(temperature, 1).map_err(err(&correlation))?;
    }
    if let Some(max_tokens) = body.max_tokens {
        validate_generation_knobs(0.0, max_tokens).map_err(err(&correlation))?;
    }

    let agent = state
        .store
        .update_agent(
            auth.tenant_id,
            id,
            AgentUpdate {
                name: body.name,
                description: body.description,
                primary_provider: body.primary_provider,
                fallback_provider: body.fallback_provider,
                system_prompt: body.system_prompt,
                temperature: body.temperature,
                max_tokens: body.max_tokens,
                enabled_tools: body.enabled_tools,
                voice_enabled: body.voice_enabled,
                voice_config: body.voice_config,
                is_active: body.is_active,
            },
        )
        .await
        .map_err(err(&correlation))?;

    Ok(Json(serde_json::json!(agent)))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require_admin().map_err(err(&correlation))?;
    state
        .store
        .delete_agent(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create or reuse the agent's demo session (never billed).
pub async fn demo(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let session = state
        .sessions
        .create_demo(auth.tenant_id, id)
        .await
        .map_err(err(&correlation))?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(session))))
}
