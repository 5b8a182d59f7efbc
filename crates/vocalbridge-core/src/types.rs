//! Entity types persisted by the gateway
//!
//! Identifiers are UUIDs; the tenant and session ids are newtyped because they
//! scope nearly every query and the session id additionally keys the advisory
//! lock. Timestamps are UTC instants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::chat::ToolCall;
use crate::{Error, Result};

/// Unique identifier for a tenant, the top-level owner boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn from_string(s: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(s)
            .map_err(|e| Error::Validation(format!("Invalid tenant ID format: {}", e)))?;
        Ok(Self(uuid))
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
    }
}

/// Unique identifier for a session (one conversation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn from_string(s: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(s)
            .map_err(|e| Error::Validation(format!("Invalid session ID format: {}", e)))?;
        Ok(Self(uuid))
    }

    /// 64-bit key for the Postgres advisory lock, derived with FNV-1a over
    /// the raw UUID bytes. Stable across processes.
    pub fn lock_key(&self) -> i64 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = FNV_OFFSET;
        for byte in self.0.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash as i64
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
    }
}

/// Configured upstream AI vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    #[serde(rename = "VENDOR_A")]
    VendorA,
    #[serde(rename = "VENDOR_B")]
    VendorB,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::VendorA => "VENDOR_A",
            ProviderId::VendorB => "VENDOR_B",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "VENDOR_A" => Ok(ProviderId::VendorA),
            "VENDOR_B" => Ok(ProviderId::VendorB),
            other => Err(Error::Validation(format!("Unknown provider: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiKeyRole {
    Admin,
    Analyst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Chat,
    Voice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Ended,
    Error,
}

/// Transcript entry role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Success,
    Failed,
    Timeout,
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStatus {
    Success,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    SendMessage,
    VoiceProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioArtifactType {
    UserInput,
    AssistantOutput,
}

/// Owner boundary: holds agents, sessions, usage, and keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Authentication principal. The plaintext key is shown once at creation and
/// only its SHA-256 digest is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// First bytes of the plaintext, for display.
    pub prefix: String,
    /// Hex-encoded SHA-256 of the plaintext. Unique.
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub role: ApiKeyRole,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// A key is valid iff it is not revoked and not past its expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Per-tenant reusable agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub primary_provider: ProviderId,
    /// May equal `primary_provider`, meaning "no vendor switch after the
    /// primary retry budget is exhausted".
    pub fallback_provider: Option<ProviderId>,
    pub system_prompt: String,
    /// In [0, 2].
    pub temperature: f32,
    /// In [1, 4096].
    pub max_tokens: u32,
    pub enabled_tools: Vec<String>,
    pub voice_enabled: bool,
    pub voice_config: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A conversation between a tenant's agent and an identified customer.
///
/// At most one ACTIVE session exists per
/// `(tenant, agent, customer, demo_mode)`; creating against an existing
/// ACTIVE match returns it unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub agent_id: Uuid,
    pub customer_id: String,
    pub channel: Channel,
    pub status: SessionStatus,
    pub demo_mode: bool,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One transcript entry. `(session, sequence_number)` is unique and sequence
/// numbers form a contiguous 1-based run per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub session_id: SessionId,
    pub sequence_number: i32,
    pub idempotency_key: Option<String>,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub provider_call_id: Option<Uuid>,
    pub audio_artifact_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Record of one outbound vendor attempt, successful or not. A call can exist
/// without any message pointing at it (a failed attempt, for instance).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCall {
    pub id: Uuid,
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
    /// Cumulative across the primary and fallback paths of one dispatch.
    pub attempt_number: i32,
    /// Only SUCCESS rows may become billed.
    pub billed: bool,
    pub created_at: DateTime<Utc>,
}

/// The cost-accounting unit; exactly one per successful provider call in a
/// non-demo session. `provider_call_id` is unique, which is the exactly-once
/// guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub agent_id: Uuid,
    pub session_id: SessionId,
    pub provider_call_id: Uuid,
    pub provider: ProviderId,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub total_tokens: i64,
    pub cost_cents: i64,
    /// Copy of the pricing tuple used, so later price changes do not
    /// retroactively alter historical bills.
    pub pricing_snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Durable unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub job_type: JobType,
    /// Unique per tenant when set.
    pub idempotency_key: Option<String>,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub status: JobStatus,
    /// In [0, 100].
    pub progress: i16,
    pub error_message: Option<String>,
    pub last_error: Option<String>,
    pub callback_url: Option<String>,
    pub callback_sent: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether a worker may claim this job right now.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        let lease_free =
            self.locked_at.is_none() || self.lock_expires_at.is_some_and(|exp| exp < now);
        matches!(self.status, JobStatus::Pending | JobStatus::Processing)
            && lease_free
            && self.attempts < self.max_attempts
    }
}

/// Audit record for one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub id: Uuid,
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
    pub created_at: DateTime<Utc>,
}

/// Opaque stored audio referenced by voice-channel messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioArtifact {
    pub id: Uuid,
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
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_session_id_lock_key_is_stable() {
        let id = SessionId::from_string("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(id.lock_key(), id.lock_key());

        let other = SessionId::new();
        assert_ne!(id.lock_key(), other.lock_key());
    }

    #[test]
    fn test_provider_id_round_trip() {
        assert_eq!(ProviderId::VendorA.as_str(), "VENDOR_A");
        assert_eq!("VENDOR_B".parse::<ProviderId>().unwrap(), ProviderId::VendorB);
        assert!("VENDOR_C".parse::<ProviderId>().is_err());

        let json = serde_json::to_string(&ProviderId::VendorA).unwrap();
        assert_eq!(json, "\"VENDOR_A\"");
    }

    #[test]
    fn test_api_key_validity_window() {
        let now = Utc::now();
        let key = ApiKey {
            id: Uuid::new_v4(),
            tenant_id: TenantId::new(),
            prefix: "vb_live_ab".into(),
            key_hash: "deadbeef".into(),
            role: ApiKeyRole::Admin,
            created_at: now,
            expires_at: None,
            revoked_at: None,
            last_used_at: None,
        };
        assert!(key.is_valid(now));

        let expired = ApiKey {
            expires_at: Some(now - Duration::seconds(1)),
            ..key.clone()
        };
        assert!(!expired.is_valid(now));

        let revoked = ApiKey {
            revoked_at: Some(now),
            ..key.clone()
        };
        assert!(!revoked.is_valid(now));

        let future_expiry = ApiKey {
            expires_at: Some(now + Duration::hours(1)),
            ..key
        };
        assert!(future_expiry.is_valid(now));
    }

    #[test]
    fn test_job_claimable() {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            tenant_id: TenantId::new(),
            job_type: JobType::SendMessage,
            idempotency_key: None,
            input: serde_json::json!({}),
            output: None,
            status: JobStatus::Pending,
            progress: 0,
            error_message: None,
            last_error: None,
            callback_url: None,
            callback_sent: false,
            locked_at: None,
            locked_by: None,
            lock_expires_at: None,
            attempts: 0,
            max_attempts: 3,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        assert!(job.is_claimable(now));

        // Held lease blocks the claim.
        let leased = Job {
            status: JobStatus::Processing,
            locked_at: Some(now),
            lock_expires_at: Some(now + Duration::minutes(5)),
            ..job.clone()
        };
        assert!(!leased.is_claimable(now));

        // Expired lease is reclaimable.
        let expired = Job {
            status: JobStatus::Processing,
            locked_at: Some(now - Duration::minutes(10)),
            lock_expires_at: Some(now - Duration::seconds(1)),
            attempts: 1,
            ..job.clone()
        };
        assert!(expired.is_claimable(now));

        // Attempt budget exhausted.
        let spent = Job {
            attempts: 3,
            ..job.clone()
        };
        assert!(!spent.is_claimable(now));

        let done = Job {
            status: JobStatus::Completed,
            ..job
        };
        assert!(!done.is_claimable(now));
    }

    #[test]
    fn test_status_serde_wire_format() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Active).unwrap(),
            "\"ACTIVE\""
        );
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"ASSISTANT\""
        );
        assert_eq!(
            serde_json::to_string(&CallStatus::RateLimited).unwrap(),
            "\"RATE_LIMITED\""
        );
        assert_eq!(
            serde_json::to_string(&JobType::SendMessage).unwrap(),
            "\"SEND_MESSAGE\""
        );
    }
}
