//! Billing and usage-analytics queries

use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use vocalbridge_core::{
    Result,
    store::{
        AgentUsage, BillingStore, NewUsageEvent, UsageBucket, UsageGroupBy, UsageTotals,
        UsageWindow,
    },
    types::{TenantId, UsageEvent},
};

use super::{PgStore, db_err, is_unique_violation, map_usage_event, provider_str};

fn totals_from_row(row: &sqlx::postgres::PgRow) -> Result<UsageTotals> {
    Ok(UsageTotals {
        event_count: row
            .try_get("event_count")
            .map_err(db_err("usage.event_count"))?,
        tokens_in: row.try_get("tokens_in").map_err(db_err("usage.tokens_in"))?,
        tokens_out: row
            .try_get("tokens_out")
            .map_err(db_err("usage.tokens_out"))?,
        total_tokens: row
            .try_get("total_tokens")
            .map_err(db_err("usage.total_tokens"))?,
        cost_cents: row
            .try_get("cost_cents")
            .map_err(db_err("usage.cost_cents"))?,
    })
}

#[async_trait]
impl BillingStore for PgStore {
    async fn mark_billed(&self, provider_call_id: Uuid) -> Result<bool> {
        // Affected-row count is the whole point: exactly one caller flips
        // the flag.
        let result = sqlx::query(
            "UPDATE provider_calls SET billed = TRUE WHERE id = $1 AND billed = FALSE",
        )
        .bind(provider_call_id)
        .execute(self.pool())
        .await
        .map_err(db_err("Failed to flip billed flag"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_usage_event(&self, new: NewUsageEvent) -> Result<Option<UsageEvent>> {
        let insert = sqlx::query(
            r#"
            INSERT INTO usage_events (
                id, tenant_id, agent_id, session_id, provider_call_id,
                provider, tokens_in, tokens_out, total_tokens, cost_cents,
                pricing_snapshot
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id.as_uuid())
        .bind(new.agent_id)
        .bind(new.session_id.as_uuid())
        .bind(new.provider_call_id)
        .bind(provider_str(new.provider))
        .bind(new.tokens_in)
        .bind(new.tokens_out)
        .bind(new.tokens_in + new.tokens_out)
        .bind(new.cost_cents)
        .bind(&new.pricing_snapshot)
        .fetch_one(self.pool())
        .await;

        match insert {
            Ok(row) => Ok(Some(map_usage_event(&row)?)),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(db_err("Failed to insert usage event")(e)),
        }
    }

    async fn usage_totals(&self, tenant_id: TenantId, window: UsageWindow) -> Result<UsageTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS event_count,
                COALESCE(SUM(tokens_in), 0) AS tokens_in,
                COALESCE(SUM(tokens_out), 0) AS tokens_out,
                COALESCE(SUM(total_tokens), 0) AS total_tokens,
                COALESCE(SUM(cost_cents), 0) AS cost_cents
            FROM usage_events
            WHERE tenant_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(window.from)
        .bind(window.to)
        .fetch_one(self.pool())
        .await
        .map_err(db_err("Failed to aggregate usage"))?;
        totals_from_row(&row)
    }

    async fn usage_breakdown(
        &self,
        tenant_id: TenantId,
        group_by: UsageGroupBy,
        window: UsageWindow,
    ) -> Result<Vec<UsageBucket>> {
        let key_expr = match group_by {
            UsageGroupBy::Provider => "provider",
            UsageGroupBy::Agent => "agent_id::text",
            UsageGroupBy::Day => "to_char(created_at, 'YYYY-MM-DD')",
        };
        let sql = format!(
            r#"
            SELECT
                {key_expr} AS bucket_key,
                COUNT(*) AS event_count,
                COALESCE(SUM(tokens_in), 0) AS tokens_in,
                COALESCE(SUM(tokens_out), 0) AS tokens_out,
                COALESCE(SUM(total_tokens), 0) AS total_tokens,
                COALESCE(SUM(cost_cents), 0) AS cost_cents
            FROM usage_events
            WHERE tenant_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            GROUP BY bucket_key
            ORDER BY bucket_key
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(window.from)
            .bind(window.to)
            .fetch_all(self.pool())
            .await
            .map_err(db_err("Failed to aggregate usage breakdown"))?;

        rows.iter()
            .map(|row| {
                Ok(UsageBucket {
                    key: row.try_get("bucket_key").map_err(db_err("usage.bucket_key"))?,
                    totals: totals_from_row(row)?,
                })
            })
            .collect()
    }

    async fn top_agents(&self, tenant_id: TenantId, limit: i64) -> Result<Vec<AgentUsage>> {
        let rows = sqlx::query(
            r#"
            SELECT
                u.agent_id,
                a.name AS agent_name,
                COUNT(*) AS event_count,
                COALESCE(SUM(u.tokens_in), 0) AS tokens_in,
                COALESCE(SUM(u.tokens_out), 0) AS tokens_out,
                COALESCE(SUM(u.total_tokens), 0) AS total_tokens,
                COALESCE(SUM(u.cost_cents), 0) AS cost_cents
            FROM usage_events u
            LEFT JOIN agents a ON a.id = u.agent_id
            WHERE u.tenant_id = $1
            GROUP BY u.agent_id, a.name
            ORDER BY cost_cents DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err("Failed to aggregate top agents"))?;

        rows.iter()
            .map(|row| {
                Ok(AgentUsage {
                    agent_id: row.try_get("agent_id").map_err(db_err("usage.agent_id"))?,
                    agent_name: row
                        .try_get("agent_name")
                        .map_err(db_err("usage.agent_name"))?,
                    totals: totals_from_row(row)?,
                })
            })
            .collect()
    }

    async fn count_usage_events_for_call(&self, provider_call_id: Uuid) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM usage_events WHERE provider_call_id = $1")
            .bind(provider_call_id)
            .fetch_one(self.pool())
            .await
            .map_err(db_err("Failed to count usage events"))
    }
}
