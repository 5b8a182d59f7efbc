//! Tenant and API key queries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    store::TenantStore,
    types::{ApiKey, ApiKeyRole, Tenant, TenantId},
};

use super::{PgStore, db_err, is_unique_violation, map_api_key, map_tenant, role_str};

#[async_trait]
impl TenantStore for PgStore {
    async fn create_tenant(&self, name: &str, email: &str) -> Result<Tenant> {
        let row = sqlx::query(
            r#"
            INSERT INTO tenants (id, name, email)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict(format!("tenant with email {} already exists", email))
            } else {
                Error::Database(format!("Failed to create tenant: {}", e))
            }
        })?;
        map_tenant(&row)
    }

    async fn get_tenant(&self, id: TenantId) -> Result<Tenant> {
        let row = sqlx::query("SELECT * FROM tenants WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("Failed to fetch tenant"))?
            .ok_or_else(|| Error::NotFound("tenant".to_string()))?;
        map_tenant(&row)
    }

    async fn create_api_key(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        key_hash: &str,
        role: ApiKeyRole,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKey> {
        let row = sqlx::query(
            r#"
            INSERT INTO api_keys (id, tenant_id, prefix, key_hash, role, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id.as_uuid())
        .bind(prefix)
        .bind(key_hash)
        .bind(role_str(role))
        .bind(expires_at)
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict("api key hash collision".to_string())
            } else {
                Error::Database(format!("Failed to create api key: {}", e))
            }
        })?;
        map_api_key(&row)
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("Failed to fetch api key"))?;
        row.as_ref().map(map_api_key).transpose()
    }

    async fn touch_api_key(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err("Failed to touch api key"))?;
        Ok(())
    }

    async fn revoke_api_key(&self, tenant_id: TenantId, id: Uuid) -> Result<ApiKey> {
        let row = sqlx::query(
            r#"
            UPDATE api_keys
            SET revoked_at = COALESCE(revoked_at, NOW())
            WHERE id = $1 AND tenant_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("Failed to revoke api key"))?
        .ok_or_else(|| Error::NotFound("api key".to_string()))?;
        map_api_key(&row)
    }

    async fn list_api_keys(&self, tenant_id: TenantId) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query(
            "SELECT * FROM api_keys WHERE tenant_id = $1 ORDER BY created_at ASC",
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(self.pool())
        .await
        .map_err(db_err("Failed to list api keys"))?;
        rows.iter().map(map_api_key).collect()
    }
}
