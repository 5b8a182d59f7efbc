//! Storage abstractions
//!
//! Business logic is written against these traits. Two backends exist: the
//! Postgres store for fleet deployments and an in-memory store for
//! single-node mode and tests. Both enforce the same invariants: one ACTIVE
//! session per `(tenant, agent, customer, demo)`, contiguous per-session
//! sequence numbers, unique `(session, idempotency_key)`, and at most one
//! usage event per provider call.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;
use crate::chat::ToolCall;
use crate::types::{
    Agent, ApiKey, ApiKeyRole, AudioArtifact, AudioArtifactType, CallStatus, Channel, Job,
    JobType, Message, MessageRole, ProviderCall, ProviderId, Session, SessionId, SessionStatus,
    Tenant, TenantId, ToolExecution, ToolStatus, UsageEvent,
};

/// Insert shape for an agent.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub primary_provider: ProviderId,
    pub fallback_provider: Option<ProviderId>,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub enabled_tools: Vec<String>,
    pub voice_enabled: bool,
    pub voice_config: Option<serde_json::Value>,
}

/// Patch shape for an agent; unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
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

#[derive(Debug, Clone)]
pub struct NewSession {
    pub tenant_id: TenantId,
    pub agent_id: Uuid,
    pub customer_id: String,
    pub channel: Channel,
    pub demo_mode: bool,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: SessionId,
    pub sequence_number: i32,
    pub idempotency_key: Option<String>,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub provider_call_id: Option<Uuid>,
    pub audio_artifact_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewProviderCall {
    pub session_id: SessionId,
    pub correlation_id: String,
    pub provider: ProviderId,
    pub is_fallback: bool,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub latency_ms: i64,
    pub status: CallStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub attempt_number: i32,
}

#[derive(Debug, Clone)]
pub struct NewUsageEvent {
    pub tenant_id: TenantId,
    pub agent_id: Uuid,
    pub session_id: SessionId,
    pub provider_call_id: Uuid,
    pub provider: ProviderId,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_cents: i64,
    pub pricing_snapshot: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant_id: TenantId,
    pub job_type: JobType,
    pub idempotency_key: Option<String>,
    pub input: serde_json::Value,
    pub callback_url: Option<String>,
    pub max_attempts: i32,
}

#[derive(Debug, Clone)]
pub struct NewToolExecution {
    pub session_id: SessionId,
    pub message_id: Option<Uuid>,
    pub correlation_id: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub tool_output: Option<serde_json::Value>,
    pub status: ToolStatus,
    pub error_message: Option<String>,
    pub latency_ms: i64,
    pub cost_cents: i64,
}

#[derive(Debug, Clone)]
pub struct NewAudioArtifact {
    pub session_id: SessionId,
    pub artifact_type: AudioArtifactType,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub duration_ms: Option<i64>,
    pub format: Option<String>,
    pub sample_rate: Option<i32>,
    pub provider: Option<String>,
    pub transcript: Option<String>,
    pub latency_ms: Option<i64>,
}

/// Aggregated usage numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub event_count: i64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub total_tokens: i64,
    pub cost_cents: i64,
}

/// Grouping key for `/usage/breakdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageGroupBy {
    Provider,
    Agent,
    Day,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBucket {
    /// Provider name, agent id, or `YYYY-MM-DD` day depending on grouping.
    pub key: String,
    #[serde(flatten)]
    pub totals: UsageTotals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUsage {
    pub agent_id: Uuid,
    pub agent_name: Option<String>,
    #[serde(flatten)]
    pub totals: UsageTotals,
}

/// Optional time window for usage queries.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UsageWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn create_tenant(&self, name: &str, email: &str) -> Result<Tenant>;

    async fn get_tenant(&self, id: TenantId) -> Result<Tenant>;

    async fn create_api_key(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        key_hash: &str,
        role: ApiKeyRole,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKey>;

    /// Lookup by the hex SHA-256 digest of the plaintext. Returns revoked and
    /// expired keys too; validity is the caller's check.
    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>>;

    /// Best-effort `last_used_at` bump.
    async fn touch_api_key(&self, id: Uuid) -> Result<()>;

    async fn revoke_api_key(&self, tenant_id: TenantId, id: Uuid) -> Result<ApiKey>;

    async fn list_api_keys(&self, tenant_id: TenantId) -> Result<Vec<ApiKey>>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn create_agent(&self, new: NewAgent) -> Result<Agent>;

    async fn get_agent(&self, tenant_id: TenantId, id: Uuid) -> Result<Agent>;

    async fn list_agents(&self, tenant_id: TenantId) -> Result<Vec<Agent>>;

    async fn update_agent(&self, tenant_id: TenantId, id: Uuid, update: AgentUpdate)
    -> Result<Agent>;

    /// Deactivates the agent; transcripts and usage history survive.
    async fn delete_agent(&self, tenant_id: TenantId, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a session, or return the existing ACTIVE session for the same
    /// `(tenant, agent, customer, demo_mode)` unchanged.
    async fn create_session(&self, new: NewSession) -> Result<Session>;

    async fn get_session(&self, tenant_id: TenantId, id: SessionId) -> Result<Session>;

    async fn list_sessions(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>>;

    async fn end_session(&self, tenant_id: TenantId, id: SessionId) -> Result<Session>;

    async fn set_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()>;

    /// Allocate the next sequence number for a session: strictly increasing,
    /// gap-free under concurrency. Callers for the same session serialize on
    /// the session row.
    async fn next_sequence(&self, session_id: SessionId) -> Result<i32>;

    /// Insert a message. A `(session, idempotency_key)` unique violation
    /// surfaces as `Error::Conflict` so the caller can re-drive the
    /// idempotent short-circuit.
    async fn insert_message(&self, new: NewMessage) -> Result<Message>;

    /// The most recent `limit` messages of a session, in ascending sequence
    /// order.
    async fn list_messages(&self, session_id: SessionId, limit: i64) -> Result<Vec<Message>>;

    async fn count_messages(&self, session_id: SessionId) -> Result<i64>;

    async fn find_message_by_idempotency_key(
        &self,
        session_id: SessionId,
        key: &str,
    ) -> Result<Option<Message>>;

    async fn find_message_by_sequence(
        &self,
        session_id: SessionId,
        sequence_number: i32,
    ) -> Result<Option<Message>>;

    async fn insert_provider_call(&self, new: NewProviderCall) -> Result<ProviderCall>;

    async fn get_provider_call(&self, id: Uuid) -> Result<ProviderCall>;

    async fn list_provider_calls(&self, session_id: SessionId) -> Result<Vec<ProviderCall>>;

    async fn insert_tool_execution(&self, new: NewToolExecution) -> Result<ToolExecution>;

    async fn insert_audio_artifact(&self, new: NewAudioArtifact) -> Result<AudioArtifact>;

    async fn get_audio_artifact(
        &self,
        session_id: SessionId,
        id: Uuid,
    ) -> Result<AudioArtifact>;
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Conditional update `billed = true WHERE id = :id AND billed = false`.
    /// Returns whether this caller won the flip. The single source of truth
    /// for "has this call been billed".
    async fn mark_billed(&self, provider_call_id: Uuid) -> Result<bool>;

    /// Insert a usage event. Returns `None` when the unique constraint on
    /// `provider_call_id` is violated (second-line defense; never an error).
    async fn insert_usage_event(&self, new: NewUsageEvent) -> Result<Option<UsageEvent>>;

    async fn usage_totals(&self, tenant_id: TenantId, window: UsageWindow) -> Result<UsageTotals>;

    async fn usage_breakdown(
        &self,
        tenant_id: TenantId,
        group_by: UsageGroupBy,
        window: UsageWindow,
    ) -> Result<Vec<UsageBucket>>;

    async fn top_agents(&self, tenant_id: TenantId, limit: i64) -> Result<Vec<AgentUsage>>;

    /// How many usage events reference a provider call. Exactly-once billing
    /// means this is 0 before billing and 1 after, never more.
    async fn count_usage_events_for_call(&self, provider_call_id: Uuid) -> Result<i64>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a job. A duplicate `(tenant, idempotency_key)` returns the
    /// existing job unchanged.
    async fn enqueue_job(&self, new: NewJob) -> Result<Job>;

    async fn get_job(&self, tenant_id: TenantId, id: Uuid) -> Result<Job>;

    async fn list_jobs(&self, tenant_id: TenantId, limit: i64, offset: i64) -> Result<Vec<Job>>;

    /// Atomically claim the oldest eligible job: PENDING or PROCESSING with a
    /// free or expired lease and attempts below the bound. The claim sets
    /// PROCESSING, stamps the lease, and pre-increments `attempts`.
    async fn claim_job(&self, worker_id: &str, lease: Duration) -> Result<Option<Job>>;

    async fn complete_job(&self, id: Uuid, output: serde_json::Value) -> Result<Job>;

    /// Record a failed attempt: re-eligible PENDING while attempts remain,
    /// terminal FAILED otherwise.
    async fn fail_job_attempt(&self, id: Uuid, error: &str) -> Result<Job>;

    async fn set_job_progress(&self, id: Uuid, progress: i16) -> Result<()>;

    async fn mark_callback_sent(&self, id: Uuid) -> Result<()>;

    /// Reset PROCESSING rows with expired leases back to PENDING. Run at
    /// worker startup to rescue jobs abandoned by crashed workers.
    async fn recover_expired_jobs(&self) -> Result<u64>;
}

/// The full storage surface a deployment wires up once.
pub trait Store:
    TenantStore + AgentStore + ConversationStore + BillingStore + JobStore + Send + Sync
{
}

impl<T> Store for T where
    T: TenantStore + AgentStore + ConversationStore + BillingStore + JobStore + Send + Sync
{
}
