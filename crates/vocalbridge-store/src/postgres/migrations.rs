//! Schema migrations
//!
//! Idempotent `CREATE TABLE IF NOT EXISTS` statements run at startup, in the
//! same style the rest of the store uses: plain SQL, explicit indexes.

use vocalbridge_core::{Error, Result};

use super::PgStore;

impl PgStore {
    pub(crate) async fn run_migrations(&self) -> Result<()> {
        let statements: &[(&str, &str)] = &[
            (
                "tenants",
                r#"
                CREATE TABLE IF NOT EXISTS tenants (
                    id UUID PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "api_keys",
                r#"
                CREATE TABLE IF NOT EXISTS api_keys (
                    id UUID PRIMARY KEY,
                    tenant_id UUID NOT NULL REFERENCES tenants(id),
                    prefix TEXT NOT NULL,
                    key_hash TEXT NOT NULL UNIQUE,
                    role TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    expires_at TIMESTAMPTZ,
                    revoked_at TIMESTAMPTZ,
                    last_used_at TIMESTAMPTZ
                )
                "#,
            ),
            (
                "agents",
                r#"
                CREATE TABLE IF NOT EXISTS agents (
                    id UUID PRIMARY KEY,
                    tenant_id UUID NOT NULL REFERENCES tenants(id),
                    name TEXT NOT NULL,
                    description TEXT,
                    primary_provider TEXT NOT NULL,
                    fallback_provider TEXT,
                    system_prompt TEXT NOT NULL,
                    temperature DOUBLE PRECISION NOT NULL,
                    max_tokens INTEGER NOT NULL,
                    enabled_tools JSONB NOT NULL DEFAULT '[]'::jsonb,
                    voice_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                    voice_config JSONB,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "sessions",
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    id UUID PRIMARY KEY,
                    tenant_id UUID NOT NULL REFERENCES tenants(id),
                    agent_id UUID NOT NULL REFERENCES agents(id),
                    customer_id TEXT NOT NULL,
                    channel TEXT NOT NULL,
                    status TEXT NOT NULL,
                    demo_mode BOOLEAN NOT NULL DEFAULT FALSE,
                    metadata JSONB,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    ended_at TIMESTAMPTZ
                )
                "#,
            ),
            (
                "messages",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id UUID PRIMARY KEY,
                    session_id UUID NOT NULL REFERENCES sessions(id),
                    sequence_number INTEGER NOT NULL,
                    idempotency_key TEXT,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    tool_calls JSONB NOT NULL DEFAULT '[]'::jsonb,
                    provider_call_id UUID,
                    audio_artifact_id UUID,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "provider_calls",
                r#"
                CREATE TABLE IF NOT EXISTS provider_calls (
                    id UUID PRIMARY KEY,
                    session_id UUID NOT NULL REFERENCES sessions(id),
                    correlation_id TEXT NOT NULL,
                    provider TEXT NOT NULL,
                    is_fallback BOOLEAN NOT NULL DEFAULT FALSE,
                    tokens_in BIGINT NOT NULL DEFAULT 0,
                    tokens_out BIGINT NOT NULL DEFAULT 0,
                    latency_ms BIGINT NOT NULL DEFAULT 0,
                    status TEXT NOT NULL,
                    error_code TEXT,
                    error_message TEXT,
                    attempt_number INTEGER NOT NULL,
                    billed BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "usage_events",
                r#"
                CREATE TABLE IF NOT EXISTS usage_events (
                    id UUID PRIMARY KEY,
                    tenant_id UUID NOT NULL REFERENCES tenants(id),
                    agent_id UUID NOT NULL REFERENCES agents(id),
                    session_id UUID NOT NULL REFERENCES sessions(id),
                    provider_call_id UUID NOT NULL UNIQUE REFERENCES provider_calls(id),
                    provider TEXT NOT NULL,
                    tokens_in BIGINT NOT NULL,
                    tokens_out BIGINT NOT NULL,
                    total_tokens BIGINT NOT NULL,
                    cost_cents BIGINT NOT NULL,
                    pricing_snapshot JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "jobs",
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id UUID PRIMARY KEY,
                    tenant_id UUID NOT NULL REFERENCES tenants(id),
                    job_type TEXT NOT NULL,
                    idempotency_key TEXT,
                    input JSONB NOT NULL,
                    output JSONB,
                    status TEXT NOT NULL,
                    progress SMALLINT NOT NULL DEFAULT 0,
                    error_message TEXT,
                    last_error TEXT,
                    callback_url TEXT,
                    callback_sent BOOLEAN NOT NULL DEFAULT FALSE,
                    locked_at TIMESTAMPTZ,
                    locked_by TEXT,
                    lock_expires_at TIMESTAMPTZ,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    max_attempts INTEGER NOT NULL DEFAULT 3,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    started_at TIMESTAMPTZ,
                    completed_at TIMESTAMPTZ
                )
                "#,
            ),
            (
                "tool_executions",
                r#"
                CREATE TABLE IF NOT EXISTS tool_executions (
                    id UUID PRIMARY KEY,
                    session_id UUID NOT NULL REFERENCES sessions(id),
                    message_id UUID,
                    correlation_id TEXT NOT NULL,
                    tool_name TEXT NOT NULL,
                    tool_input JSONB NOT NULL,
                    tool_output JSONB,
                    status TEXT NOT NULL,
                    error_message TEXT,
                    latency_ms BIGINT NOT NULL DEFAULT 0,
                    cost_cents BIGINT NOT NULL DEFAULT 0,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "audio_artifacts",
                r#"
                CREATE TABLE IF NOT EXISTS audio_artifacts (
                    id UUID PRIMARY KEY,
                    session_id UUID NOT NULL REFERENCES sessions(id),
                    artifact_type TEXT NOT NULL,
                    file_path TEXT,
                    file_size BIGINT,
                    duration_ms BIGINT,
                    format TEXT,
                    sample_rate INTEGER,
                    provider TEXT,
                    transcript TEXT,
                    latency_ms BIGINT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
        ];

        for (table, ddl) in statements {
            sqlx::query(ddl)
                .execute(&*self.pool)
                .await
                .map_err(|e| Error::Database(format!("Failed to create {} table: {}", table, e)))?;
        }

        // Indexes are best-effort: a racing sibling process may have created
        // them already.
        let indexes: &[&str] = &[
            "CREATE INDEX IF NOT EXISTS idx_sessions_tenant_time ON sessions(tenant_id, created_at DESC)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_customer \
             ON sessions(tenant_id, agent_id, customer_id) \
             WHERE status = 'ACTIVE' AND demo_mode = FALSE",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_demo \
             ON sessions(tenant_id, agent_id, customer_id) \
             WHERE status = 'ACTIVE' AND demo_mode = TRUE",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_session_seq \
             ON messages(session_id, sequence_number)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_session_idem \
             ON messages(session_id, idempotency_key) \
             WHERE idempotency_key IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS idx_provider_calls_billed \
             ON provider_calls(billed, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_provider_calls_provider_status \
             ON provider_calls(provider, status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_provider_calls_session \
             ON provider_calls(session_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_usage_events_tenant_provider \
             ON usage_events(tenant_id, provider, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_status_lease \
             ON jobs(status, lock_expires_at)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_tenant_idem \
             ON jobs(tenant_id, idempotency_key) \
             WHERE idempotency_key IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS idx_tool_executions_session \
             ON tool_executions(session_id, created_at)",
        ];
        for ddl in indexes {
            sqlx::query(ddl).execute(&*self.pool).await.ok();
        }

        Ok(())
    }
}
