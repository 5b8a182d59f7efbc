//! Agent queries

use async_trait::async_trait;
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    store::{AgentStore, AgentUpdate, NewAgent},
    types::{Agent, TenantId},
};

use super::{PgStore, db_err, map_agent, provider_str};

#[async_trait]
impl AgentStore for PgStore {
    async fn create_agent(&self, new: NewAgent) -> Result<Agent> {
        let row = sqlx::query(
            r#"
            INSERT INTO agents (
                id, tenant_id, name, description, primary_provider,
                fallback_provider, system_prompt, temperature, max_tokens,
                enabled_tools, voice_enabled, voice_config
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id.as_uuid())
        .bind(&new.name)
        .bind(&new.description)
        .bind(provider_str(new.primary_provider))
        .bind(new.fallback_provider.map(provider_str))
        .bind(&new.system_prompt)
        .bind(new.temperature as f64)
        .bind(new.max_tokens as i32)
        .bind(serde_json::to_value(&new.enabled_tools)?)
        .bind(new.voice_enabled)
        .bind(&new.voice_config)
        .fetch_one(self.pool())
        .await
        .map_err(db_err("Failed to create agent"))?;
        map_agent(&row)
    }

    async fn get_agent(&self, tenant_id: TenantId, id: Uuid) -> Result<Agent> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("Failed to fetch agent"))?
            .ok_or_else(|| Error::NotFound("agent".to_string()))?;
        map_agent(&row)
    }

    async fn list_agents(&self, tenant_id: TenantId) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE tenant_id = $1 ORDER BY created_at ASC")
            .bind(tenant_id.as_uuid())
            .fetch_all(self.pool())
            .await
            .map_err(db_err("Failed to list agents"))?;
        rows.iter().map(map_agent).collect()
    }

    async fn update_agent(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        update: AgentUpdate,
    ) -> Result<Agent> {
        // Read-modify-write keeps the patch semantics (including explicit
        // NULL assignment for double-Option fields) in one place.
        let mut agent = self.get_agent(tenant_id, id).await?;
        if let Some(name) = update.name {
            agent.name = name;
        }
        if let Some(description) = update.description {
            agent.description = description;
        }
        if let Some(primary) = update.primary_provider {
            agent.primary_provider = primary;
        }
        if let Some(fallback) = update.fallback_provider {
            agent.fallback_provider = fallback;
        }
        if let Some(system_prompt) = update.system_prompt {
            agent.system_prompt = system_prompt;
        }
        if let Some(temperature) = update.temperature {
            agent.temperature = temperature;
        }
        if let Some(max_tokens) = update.max_tokens {
            agent.max_tokens = max_tokens;
        }
        if let Some(enabled_tools) = update.enabled_tools {
            agent.enabled_tools = enabled_tools;
        }
        if let Some(voice_enabled) = update.voice_enabled {
            agent.voice_enabled = voice_enabled;
        }
        if let Some(voice_config) = update.voice_config {
            agent.voice_config = voice_config;
        }
        if let Some(is_active) = update.is_active {
            agent.is_active = is_active;
        }

        let row = sqlx::query(
            r#"
            UPDATE agents SET
                name = $3, description = $4, primary_provider = $5,
                fallback_provider = $6, system_prompt = $7, temperature = $8,
                max_tokens = $9, enabled_tools = $10, voice_enabled = $11,
                voice_config = $12, is_active = $13, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id.as_uuid())
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(provider_str(agent.primary_provider))
        .bind(agent.fallback_provider.map(provider_str))
        .bind(&agent.system_prompt)
        .bind(agent.temperature as f64)
        .bind(agent.max_tokens as i32)
        .bind(serde_json::to_value(&agent.enabled_tools)?)
        .bind(agent.voice_enabled)
        .bind(&agent.voice_config)
        .bind(agent.is_active)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("Failed to update agent"))?
        .ok_or_else(|| Error::NotFound("agent".to_string()))?;
        map_agent(&row)
    }

    async fn delete_agent(&self, tenant_id: TenantId, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE agents SET is_active = FALSE, updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id.as_uuid())
        .execute(self.pool())
        .await
        .map_err(db_err("Failed to deactivate agent"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("agent".to_string()));
        }
        Ok(())
    }
}
