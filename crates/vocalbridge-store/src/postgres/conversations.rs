//! Session, message, provider-call, tool-execution, and audio queries

use async_trait::async_trait;
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    store::{
        ConversationStore, NewAudioArtifact, NewMessage, NewProviderCall, NewSession,
        NewToolExecution,
    },
    types::{
        AudioArtifact, Message, ProviderCall, Session, SessionId, SessionStatus, TenantId,
        ToolExecution,
    },
};

use super::{
    PgStore, artifact_type_str, call_status_str, channel_str, db_err, is_unique_violation,
    map_audio_artifact, map_message, map_provider_call, map_session, map_tool_execution,
    message_role_str, provider_str, session_status_str, tool_status_str,
};

impl PgStore {
    async fn find_active_session(&self, new: &NewSession) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE tenant_id = $1 AND agent_id = $2 AND customer_id = $3
              AND demo_mode = $4 AND status = 'ACTIVE'
            "#,
        )
        .bind(new.tenant_id.as_uuid())
        .bind(new.agent_id)
        .bind(&new.customer_id)
        .bind(new.demo_mode)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("Failed to look up active session"))?;
        row.as_ref().map(map_session).transpose()
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn create_session(&self, new: NewSession) -> Result<Session> {
        if let Some(existing) = self.find_active_session(&new).await? {
            return Ok(existing);
        }

        let insert = sqlx::query(
            r#"
            INSERT INTO sessions (
                id, tenant_id, agent_id, customer_id, channel, status,
                demo_mode, metadata
            )
            VALUES ($1, $2, $3, $4, $5, 'ACTIVE', $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id.as_uuid())
        .bind(new.agent_id)
        .bind(&new.customer_id)
        .bind(channel_str(new.channel))
        .bind(new.demo_mode)
        .bind(&new.metadata)
        .fetch_one(self.pool())
        .await;

        match insert {
            Ok(row) => map_session(&row),
            // A concurrent creator won the partial unique index; return
            // their session unchanged.
            Err(e) if is_unique_violation(&e) => self
                .find_active_session(&new)
                .await?
                .ok_or_else(|| Error::Conflict("active session raced and ended".to_string())),
            Err(e) => Err(Error::Database(format!("Failed to create session: {}", e))),
        }
    }

    async fn get_session(&self, tenant_id: TenantId, id: SessionId) -> Result<Session> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1 AND tenant_id = $2")
            .bind(id.as_uuid())
            .bind(tenant_id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("Failed to fetch session"))?
            .ok_or_else(|| Error::NotFound("session".to_string()))?;
        map_session(&row)
    }

    async fn list_sessions(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sessions WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(db_err("Failed to list sessions"))?;
        rows.iter().map(map_session).collect()
    }

    async fn end_session(&self, tenant_id: TenantId, id: SessionId) -> Result<Session> {
        let row = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'ENDED', ended_at = COALESCE(ended_at, NOW())
            WHERE id = $1 AND tenant_id = $2 AND status = 'ACTIVE'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("Failed to end session"))?;

        match row {
            Some(row) => map_session(&row),
            // Already ended (or errored): return the current state.
            None => self.get_session(tenant_id, id).await,
        }
    }

    async fn set_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()> {
        let ended = status != SessionStatus::Active;
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = $2,
                ended_at = CASE WHEN $3 THEN COALESCE(ended_at, NOW()) ELSE ended_at END
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(session_status_str(status))
        .bind(ended)
        .execute(self.pool())
        .await
        .map_err(db_err("Failed to update session status"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("session".to_string()));
        }
        Ok(())
    }

    async fn next_sequence(&self, session_id: SessionId) -> Result<i32> {
        // Serialize allocators for the same session on its row lock; the
        // surrounding session lock makes allocation-to-insert atomic.
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(db_err("Failed to begin sequence transaction"))?;

        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM sessions WHERE id = $1 FOR UPDATE")
            .bind(session_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("Failed to lock session row"))?;
        if locked.is_none() {
            return Err(Error::NotFound("session".to_string()));
        }

        let next: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM messages WHERE session_id = $1",
        )
        .bind(session_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to compute next sequence"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit sequence transaction"))?;
        Ok(next)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let row = sqlx::query(
            r#"
            INSERT INTO messages (
                id, session_id, sequence_number, idempotency_key, role,
                content, tool_calls, provider_call_id, audio_artifact_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.session_id.as_uuid())
        .bind(new.sequence_number)
        .bind(&new.idempotency_key)
        .bind(message_role_str(new.role))
        .bind(&new.content)
        .bind(serde_json::to_value(&new.tool_calls)?)
        .bind(new.provider_call_id)
        .bind(new.audio_artifact_id)
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict("message sequence or idempotency key already used".to_string())
            } else {
                Error::Database(format!("Failed to insert message: {}", e))
            }
        })?;
        map_message(&row)
    }

    async fn list_messages(&self, session_id: SessionId, limit: i64) -> Result<Vec<Message>> {
        // Most recent `limit`, returned in ascending sequence order.
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM messages WHERE session_id = $1
                ORDER BY sequence_number DESC
                LIMIT $2
            ) recent
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err("Failed to list messages"))?;
        rows.iter().map(map_message).collect()
    }

    async fn count_messages(&self, session_id: SessionId) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = $1")
            .bind(session_id.as_uuid())
            .fetch_one(self.pool())
            .await
            .map_err(db_err("Failed to count messages"))
    }

    async fn find_message_by_idempotency_key(
        &self,
        session_id: SessionId,
        key: &str,
    ) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT * FROM messages WHERE session_id = $1 AND idempotency_key = $2",
        )
        .bind(session_id.as_uuid())
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("Failed to fetch message by idempotency key"))?;
        row.as_ref().map(map_message).transpose()
    }

    async fn find_message_by_sequence(
        &self,
        session_id: SessionId,
        sequence_number: i32,
    ) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT * FROM messages WHERE session_id = $1 AND sequence_number = $2",
        )
        .bind(session_id.as_uuid())
        .bind(sequence_number)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("Failed to fetch message by sequence"))?;
        row.as_ref().map(map_message).transpose()
    }

    async fn insert_provider_call(&self, new: NewProviderCall) -> Result<ProviderCall> {
        let row = sqlx::query(
            r#"
            INSERT INTO provider_calls (
                id, session_id, correlation_id, provider, is_fallback,
                tokens_in, tokens_out, latency_ms, status, error_code,
                error_message, attempt_number
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.session_id.as_uuid())
        .bind(&new.correlation_id)
        .bind(provider_str(new.provider))
        .bind(new.is_fallback)
        .bind(new.tokens_in)
        .bind(new.tokens_out)
        .bind(new.latency_ms)
        .bind(call_status_str(new.status))
        .bind(&new.error_code)
        .bind(&new.error_message)
        .bind(new.attempt_number)
        .fetch_one(self.pool())
        .await
        .map_err(db_err("Failed to insert provider call"))?;
        map_provider_call(&row)
    }

    async fn get_provider_call(&self, id: Uuid) -> Result<ProviderCall> {
        let row = sqlx::query("SELECT * FROM provider_calls WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("Failed to fetch provider call"))?
            .ok_or_else(|| Error::NotFound("provider call".to_string()))?;
        map_provider_call(&row)
    }

    async fn list_provider_calls(&self, session_id: SessionId) -> Result<Vec<ProviderCall>> {
        let rows = sqlx::query(
            "SELECT * FROM provider_calls WHERE session_id = $1 ORDER BY created_at ASC, attempt_number ASC",
        )
        .bind(session_id.as_uuid())
        .fetch_all(self.pool())
        .await
        .map_err(db_err("Failed to list provider calls"))?;
        rows.iter().map(map_provider_call).collect()
    }

    async fn insert_tool_execution(&self, new: NewToolExecution) -> Result<ToolExecution> {
        let row = sqlx::query(
            r#"
            INSERT INTO tool_executions (
                id, session_id, message_id, correlation_id, tool_name,
                tool_input, tool_output, status, error_message, latency_ms,
                cost_cents
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.session_id.as_uuid())
        .bind(new.message_id)
        .bind(&new.correlation_id)
        .bind(&new.tool_name)
        .bind(&new.tool_input)
        .bind(&new.tool_output)
        .bind(tool_status_str(new.status))
        .bind(&new.error_message)
        .bind(new.latency_ms)
        .bind(new.cost_cents)
        .fetch_one(self.pool())
        .await
        .map_err(db_err("Failed to insert tool execution"))?;
        map_tool_execution(&row)
    }

    async fn insert_audio_artifact(&self, new: NewAudioArtifact) -> Result<AudioArtifact> {
        let row = sqlx::query(
            r#"
            INSERT INTO audio_artifacts (
                id, session_id, artifact_type, file_path, file_size,
                duration_ms, format, sample_rate, provider, transcript,
                latency_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.session_id.as_uuid())
        .bind(artifact_type_str(new.artifact_type))
        .bind(&new.file_path)
        .bind(new.file_size)
        .bind(new.duration_ms)
        .bind(&new.format)
        .bind(new.sample_rate)
        .bind(&new.provider)
        .bind(&new.transcript)
        .bind(new.latency_ms)
        .fetch_one(self.pool())
        .await
        .map_err(db_err("Failed to insert audio artifact"))?;
        map_audio_artifact(&row)
    }

    async fn get_audio_artifact(&self, session_id: SessionId, id: Uuid) -> Result<AudioArtifact> {
        let row = sqlx::query("SELECT * FROM audio_artifacts WHERE id = $1 AND session_id = $2")
            .bind(id)
            .bind(session_id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("Failed to fetch audio artifact"))?
            .ok_or_else(|| Error::NotFound("audio artifact".to_string()))?;
        map_audio_artifact(&row)
    }
}
