//! PostgreSQL store
//!
//! Raw sqlx over a shared pool. Schema migrations run from the constructor.
//! Enum columns are TEXT holding the same SCREAMING_SNAKE values the API
//! serializes, so rows are greppable straight from psql.

mod agents;
mod billing;
mod conversations;
mod jobs;
mod migrations;
mod tenants;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use vocalbridge_core::{
    Error, Result,
    chat::ToolCall,
    types::{
        Agent, ApiKey, ApiKeyRole, AudioArtifact, AudioArtifactType, CallStatus, Channel, Job,
        JobStatus, JobType, Message, MessageRole, ProviderCall, ProviderId, Session, SessionId,
        SessionStatus, Tenant, TenantId, ToolExecution, UsageEvent,
    },
};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 25,
            acquire_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
        }
    }
}

/// PostgreSQL-backed store for fleet deployments.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    /// Connect with default pool configuration and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_config(database_url, PgStoreConfig::default()).await
    }

    /// Connect with custom pool configuration and run migrations.
    pub async fn with_config(database_url: &str, config: PgStoreConfig) -> Result<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| Error::Database(format!("Invalid database URL: {}", e)))?
            .options([(
                "statement_timeout",
                format!("{}", config.statement_timeout.as_millis()),
            )]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to PostgreSQL: {}", e)))?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn db_err(context: &str) -> impl Fn(sqlx::Error) -> Error + '_ {
    move |e| Error::Database(format!("{}: {}", context, e))
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

// -- enum <-> TEXT helpers ---------------------------------------------------

pub(crate) fn provider_str(p: ProviderId) -> &'static str {
    p.as_str()
}

pub(crate) fn parse_provider(s: &str) -> Result<ProviderId> {
    s.parse()
        .map_err(|_| Error::Database(format!("unknown provider value '{}'", s)))
}

macro_rules! text_enum {
    ($to:ident, $parse:ident, $ty:ty, { $($variant:path => $text:literal),+ $(,)? }) => {
        pub(crate) fn $to(v: $ty) -> &'static str {
            match v {
                $($variant => $text),+
            }
        }

        pub(crate) fn $parse(s: &str) -> Result<$ty> {
            match s {
                $($text => Ok($variant)),+ ,
                other => Err(Error::Database(format!(
                    concat!("unknown ", stringify!($ty), " value '{}'"),
                    other
                ))),
            }
        }
    };
}

text_enum!(role_str, parse_role, ApiKeyRole, {
    ApiKeyRole::Admin => "ADMIN",
    ApiKeyRole::Analyst => "ANALYST",
});

text_enum!(channel_str, parse_channel, Channel, {
    Channel::Chat => "CHAT",
    Channel::Voice => "VOICE",
});

text_enum!(session_status_str, parse_session_status, SessionStatus, {
    SessionStatus::Active => "ACTIVE",
    SessionStatus::Ended => "ENDED",
    SessionStatus::Error => "ERROR",
});

text_enum!(message_role_str, parse_message_role, MessageRole, {
    MessageRole::User => "USER",
    MessageRole::Assistant => "ASSISTANT",
    MessageRole::System => "SYSTEM",
    MessageRole::Tool => "TOOL",
});

text_enum!(call_status_str, parse_call_status, CallStatus, {
    CallStatus::Success => "SUCCESS",
    CallStatus::Failed => "FAILED",
    CallStatus::Timeout => "TIMEOUT",
    CallStatus::RateLimited => "RATE_LIMITED",
});

text_enum!(tool_status_str, parse_tool_status, vocalbridge_core::types::ToolStatus, {
    vocalbridge_core::types::ToolStatus::Success => "SUCCESS",
    vocalbridge_core::types::ToolStatus::Failed => "FAILED",
    vocalbridge_core::types::ToolStatus::Timeout => "TIMEOUT",
});

text_enum!(job_status_str, parse_job_status, JobStatus, {
    JobStatus::Pending => "PENDING",
    JobStatus::Processing => "PROCESSING",
    JobStatus::Completed => "COMPLETED",
    JobStatus::Failed => "FAILED",
});

text_enum!(job_type_str, parse_job_type, JobType, {
    JobType::SendMessage => "SEND_MESSAGE",
    JobType::VoiceProcess => "VOICE_PROCESS",
});

text_enum!(artifact_type_str, parse_artifact_type, AudioArtifactType, {
    AudioArtifactType::UserInput => "USER_INPUT",
    AudioArtifactType::AssistantOutput => "ASSISTANT_OUTPUT",
});

// -- row mappers -------------------------------------------------------------

pub(crate) fn map_tenant(row: &PgRow) -> Result<Tenant> {
    Ok(Tenant {
        id: TenantId::from_uuid(row.try_get("id").map_err(db_err("tenant.id"))?),
        name: row.try_get("name").map_err(db_err("tenant.name"))?,
        email: row.try_get("email").map_err(db_err("tenant.email"))?,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("tenant.created_at"))?,
    })
}

pub(crate) fn map_api_key(row: &PgRow) -> Result<ApiKey> {
    let role: String = row.try_get("role").map_err(db_err("api_key.role"))?;
    Ok(ApiKey {
        id: row.try_get("id").map_err(db_err("api_key.id"))?,
        tenant_id: TenantId::from_uuid(
            row.try_get("tenant_id").map_err(db_err("api_key.tenant_id"))?,
        ),
        prefix: row.try_get("prefix").map_err(db_err("api_key.prefix"))?,
        key_hash: row.try_get("key_hash").map_err(db_err("api_key.key_hash"))?,
        role: parse_role(&role)?,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("api_key.created_at"))?,
        expires_at: row
            .try_get("expires_at")
            .map_err(db_err("api_key.expires_at"))?,
        revoked_at: row
            .try_get("revoked_at")
            .map_err(db_err("api_key.revoked_at"))?,
        last_used_at: row
            .try_get("last_used_at")
            .map_err(db_err("api_key.last_used_at"))?,
    })
}

pub(crate) fn map_agent(row: &PgRow) -> Result<Agent> {
    let primary: String = row
        .try_get("primary_provider")
        .map_err(db_err("agent.primary_provider"))?;
    let fallback: Option<String> = row
        .try_get("fallback_provider")
        .map_err(db_err("agent.fallback_provider"))?;
    let enabled_tools: serde_json::Value = row
        .try_get("enabled_tools")
        .map_err(db_err("agent.enabled_tools"))?;
    Ok(Agent {
        id: row.try_get("id").map_err(db_err("agent.id"))?,
        tenant_id: TenantId::from_uuid(
            row.try_get("tenant_id").map_err(db_err("agent.tenant_id"))?,
        ),
        name: row.try_get("name").map_err(db_err("agent.name"))?,
        description: row
            .try_get("description")
            .map_err(db_err("agent.description"))?,
        primary_provider: parse_provider(&primary)?,
        fallback_provider: fallback.as_deref().map(parse_provider).transpose()?,
        system_prompt: row
            .try_get("system_prompt")
            .map_err(db_err("agent.system_prompt"))?,
        temperature: row
            .try_get::<f64, _>("temperature")
            .map_err(db_err("agent.temperature"))? as f32,
        max_tokens: row
            .try_get::<i32, _>("max_tokens")
            .map_err(db_err("agent.max_tokens"))? as u32,
        enabled_tools: serde_json::from_value(enabled_tools)?,
        voice_enabled: row
            .try_get("voice_enabled")
            .map_err(db_err("agent.voice_enabled"))?,
        voice_config: row
            .try_get("voice_config")
            .map_err(db_err("agent.voice_config"))?,
        is_active: row.try_get("is_active").map_err(db_err("agent.is_active"))?,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("agent.created_at"))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(db_err("agent.updated_at"))?,
    })
}

pub(crate) fn map_session(row: &PgRow) -> Result<Session> {
    let channel: String = row.try_get("channel").map_err(db_err("session.channel"))?;
    let status: String = row.try_get("status").map_err(db_err("session.status"))?;
    Ok(Session {
        id: SessionId::from_uuid(row.try_get("id").map_err(db_err("session.id"))?),
        tenant_id: TenantId::from_uuid(
            row.try_get("tenant_id").map_err(db_err("session.tenant_id"))?,
        ),
        agent_id: row.try_get("agent_id").map_err(db_err("session.agent_id"))?,
        customer_id: row
            .try_get("customer_id")
            .map_err(db_err("session.customer_id"))?,
        channel: parse_channel(&channel)?,
        status: parse_session_status(&status)?,
        demo_mode: row.try_get("demo_mode").map_err(db_err("session.demo_mode"))?,
        metadata: row.try_get("metadata").map_err(db_err("session.metadata"))?,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("session.created_at"))?,
        ended_at: row.try_get("ended_at").map_err(db_err("session.ended_at"))?,
    })
}

pub(crate) fn map_message(row: &PgRow) -> Result<Message> {
    let role: String = row.try_get("role").map_err(db_err("message.role"))?;
    let tool_calls: serde_json::Value = row
        .try_get("tool_calls")
        .map_err(db_err("message.tool_calls"))?;
    let tool_calls: Vec<ToolCall> = serde_json::from_value(tool_calls)?;
    Ok(Message {
        id: row.try_get("id").map_err(db_err("message.id"))?,
        session_id: SessionId::from_uuid(
            row.try_get("session_id").map_err(db_err("message.session_id"))?,
        ),
        sequence_number: row
            .try_get("sequence_number")
            .map_err(db_err("message.sequence_number"))?,
        idempotency_key: row
            .try_get("idempotency_key")
            .map_err(db_err("message.idempotency_key"))?,
        role: parse_message_role(&role)?,
        content: row.try_get("content").map_err(db_err("message.content"))?,
        tool_calls,
        provider_call_id: row
            .try_get("provider_call_id")
            .map_err(db_err("message.provider_call_id"))?,
        audio_artifact_id: row
            .try_get("audio_artifact_id")
            .map_err(db_err("message.audio_artifact_id"))?,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("message.created_at"))?,
    })
}

pub(crate) fn map_provider_call(row: &PgRow) -> Result<ProviderCall> {
    let provider: String = row
        .try_get("provider")
        .map_err(db_err("provider_call.provider"))?;
    let status: String = row
        .try_get("status")
        .map_err(db_err("provider_call.status"))?;
    Ok(ProviderCall {
        id: row.try_get("id").map_err(db_err("provider_call.id"))?,
        session_id: SessionId::from_uuid(
            row.try_get("session_id")
                .map_err(db_err("provider_call.session_id"))?,
        ),
        correlation_id: row
            .try_get("correlation_id")
            .map_err(db_err("provider_call.correlation_id"))?,
        provider: parse_provider(&provider)?,
        is_fallback: row
            .try_get("is_fallback")
            .map_err(db_err("provider_call.is_fallback"))?,
        tokens_in: row
            .try_get("tokens_in")
            .map_err(db_err("provider_call.tokens_in"))?,
        tokens_out: row
            .try_get("tokens_out")
            .map_err(db_err("provider_call.tokens_out"))?,
        latency_ms: row
            .try_get("latency_ms")
            .map_err(db_err("provider_call.latency_ms"))?,
        status: parse_call_status(&status)?,
        error_code: row
            .try_get("error_code")
            .map_err(db_err("provider_call.error_code"))?,
        error_message: row
            .try_get("error_message")
            .map_err(db_err("provider_call.error_message"))?,
        attempt_number: row
            .try_get("attempt_number")
            .map_err(db_err("provider_call.attempt_number"))?,
        billed: row.try_get("billed").map_err(db_err("provider_call.billed"))?,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("provider_call.created_at"))?,
    })
}

pub(crate) fn map_usage_event(row: &PgRow) -> Result<UsageEvent> {
    let provider: String = row
        .try_get("provider")
        .map_err(db_err("usage_event.provider"))?;
    Ok(UsageEvent {
        id: row.try_get("id").map_err(db_err("usage_event.id"))?,
        tenant_id: TenantId::from_uuid(
            row.try_get("tenant_id")
                .map_err(db_err("usage_event.tenant_id"))?,
        ),
        agent_id: row
            .try_get("agent_id")
            .map_err(db_err("usage_event.agent_id"))?,
        session_id: SessionId::from_uuid(
            row.try_get("session_id")
                .map_err(db_err("usage_event.session_id"))?,
        ),
        provider_call_id: row
            .try_get("provider_call_id")
            .map_err(db_err("usage_event.provider_call_id"))?,
        provider: parse_provider(&provider)?,
        tokens_in: row
            .try_get("tokens_in")
            .map_err(db_err("usage_event.tokens_in"))?,
        tokens_out: row
            .try_get("tokens_out")
            .map_err(db_err("usage_event.tokens_out"))?,
        total_tokens: row
            .try_get("total_tokens")
            .map_err(db_err("usage_event.total_tokens"))?,
        cost_cents: row
            .try_get("cost_cents")
            .map_err(db_err("usage_event.cost_cents"))?,
        pricing_snapshot: row
            .try_get("pricing_snapshot")
            .map_err(db_err("usage_event.pricing_snapshot"))?,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("usage_event.created_at"))?,
    })
}

pub(crate) fn map_job(row: &PgRow) -> Result<Job> {
    let job_type: String = row.try_get("job_type").map_err(db_err("job.job_type"))?;
    let status: String = row.try_get("status").map_err(db_err("job.status"))?;
    Ok(Job {
        id: row.try_get("id").map_err(db_err("job.id"))?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(db_err("job.tenant_id"))?),
        job_type: parse_job_type(&job_type)?,
        idempotency_key: row
            .try_get("idempotency_key")
            .map_err(db_err("job.idempotency_key"))?,
        input: row.try_get("input").map_err(db_err("job.input"))?,
        output: row.try_get("output").map_err(db_err("job.output"))?,
        status: parse_job_status(&status)?,
        progress: row.try_get("progress").map_err(db_err("job.progress"))?,
        error_message: row
            .try_get("error_message")
            .map_err(db_err("job.error_message"))?,
        last_error: row.try_get("last_error").map_err(db_err("job.last_error"))?,
        callback_url: row
            .try_get("callback_url")
            .map_err(db_err("job.callback_url"))?,
        callback_sent: row
            .try_get("callback_sent")
            .map_err(db_err("job.callback_sent"))?,
        locked_at: row.try_get("locked_at").map_err(db_err("job.locked_at"))?,
        locked_by: row.try_get("locked_by").map_err(db_err("job.locked_by"))?,
        lock_expires_at: row
            .try_get("lock_expires_at")
            .map_err(db_err("job.lock_expires_at"))?,
        attempts: row.try_get("attempts").map_err(db_err("job.attempts"))?,
        max_attempts: row
            .try_get("max_attempts")
            .map_err(db_err("job.max_attempts"))?,
        created_at: row.try_get("created_at").map_err(db_err("job.created_at"))?,
        started_at: row.try_get("started_at").map_err(db_err("job.started_at"))?,
        completed_at: row
            .try_get("completed_at")
            .map_err(db_err("job.completed_at"))?,
    })
}

pub(crate) fn map_tool_execution(row: &PgRow) -> Result<ToolExecution> {
    let status: String = row
        .try_get("status")
        .map_err(db_err("tool_execution.status"))?;
    Ok(ToolExecution {
        id: row.try_get("id").map_err(db_err("tool_execution.id"))?,
        session_id: SessionId::from_uuid(
            row.try_get("session_id")
                .map_err(db_err("tool_execution.session_id"))?,
        ),
        message_id: row
            .try_get("message_id")
            .map_err(db_err("tool_execution.message_id"))?,
        correlation_id: row
            .try_get("correlation_id")
            .map_err(db_err("tool_execution.correlation_id"))?,
        tool_name: row
            .try_get("tool_name")
            .map_err(db_err("tool_execution.tool_name"))?,
        tool_input: row
            .try_get("tool_input")
            .map_err(db_err("tool_execution.tool_input"))?,
        tool_output: row
            .try_get("tool_output")
            .map_err(db_err("tool_execution.tool_output"))?,
        status: parse_tool_status(&status)?,
        error_message: row
            .try_get("error_message")
            .map_err(db_err("tool_execution.error_message"))?,
        latency_ms: row
            .try_get("latency_ms")
            .map_err(db_err("tool_execution.latency_ms"))?,
        cost_cents: row
            .try_get("cost_cents")
            .map_err(db_err("tool_execution.cost_cents"))?,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("tool_execution.created_at"))?,
    })
}

pub(crate) fn map_audio_artifact(row: &PgRow) -> Result<AudioArtifact> {
    let artifact_type: String = row
        .try_get("artifact_type")
        .map_err(db_err("audio_artifact.artifact_type"))?;
    Ok(AudioArtifact {
        id: row.try_get("id").map_err(db_err("audio_artifact.id"))?,
        session_id: SessionId::from_uuid(
            row.try_get("session_id")
                .map_err(db_err("audio_artifact.session_id"))?,
        ),
        artifact_type: parse_artifact_type(&artifact_type)?,
        file_path: row
            .try_get("file_path")
            .map_err(db_err("audio_artifact.file_path"))?,
        file_size: row
            .try_get("file_size")
            .map_err(db_err("audio_artifact.file_size"))?,
        duration_ms: row
            .try_get("duration_ms")
            .map_err(db_err("audio_artifact.duration_ms"))?,
        format: row.try_get("format").map_err(db_err("audio_artifact.format"))?,
        sample_rate: row
            .try_get("sample_rate")
            .map_err(db_err("audio_artifact.sample_rate"))?,
        provider: row
            .try_get("provider")
            .map_err(db_err("audio_artifact.provider"))?,
        transcript: row
            .try_get("transcript")
            .map_err(db_err("audio_artifact.transcript"))?,
        latency_ms: row
            .try_get("latency_ms")
            .map_err(db_err("audio_artifact.latency_ms"))?,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("audio_artifact.created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_text_round_trips() {
        assert_eq!(parse_session_status(session_status_str(SessionStatus::Active)).unwrap(), SessionStatus::Active);
        assert_eq!(parse_message_role(message_role_str(MessageRole::Tool)).unwrap(), MessageRole::Tool);
        assert_eq!(parse_call_status(call_status_str(CallStatus::RateLimited)).unwrap(), CallStatus::RateLimited);
        assert_eq!(parse_job_status(job_status_str(JobStatus::Processing)).unwrap(), JobStatus::Processing);
        assert_eq!(parse_job_type(job_type_str(JobType::VoiceProcess)).unwrap(), JobType::VoiceProcess);
        assert_eq!(parse_channel(channel_str(Channel::Voice)).unwrap(), Channel::Voice);
        assert_eq!(parse_role(role_str(ApiKeyRole::Analyst)).unwrap(), ApiKeyRole::Analyst);
        assert!(parse_session_status("NOPE").is_err());
    }
}
