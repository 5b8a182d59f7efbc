//! In-memory store
//!
//! A single mutex over plain maps. Coarse, but it makes every multi-step
//! operation (session reuse, job claim, billing flip) atomic by construction,
//! which is exactly the semantics the Postgres backend gets from row locks.
//! Used by single-node deployments and the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    store::{
        AgentStore, AgentUpdate, AgentUsage, BillingStore, ConversationStore, JobStore, NewAgent,
        NewAudioArtifact, NewJob, NewMessage, NewProviderCall, NewSession, NewToolExecution,
        NewUsageEvent, TenantStore, UsageBucket, UsageGroupBy, UsageTotals, UsageWindow,
    },
    types::{
        Agent, ApiKey, ApiKeyRole, AudioArtifact, Job, JobStatus, Message, ProviderCall, Session,
        SessionId, SessionStatus, Tenant, TenantId, ToolExecution, UsageEvent,
    },
};

#[derive(Default)]
struct State {
    tenants: HashMap<TenantId, Tenant>,
    api_keys: HashMap<Uuid, ApiKey>,
    agents: HashMap<Uuid, Agent>,
    sessions: HashMap<SessionId, Session>,
    messages: Vec<Message>,
    provider_calls: HashMap<Uuid, ProviderCall>,
    usage_events: Vec<UsageEvent>,
    jobs: HashMap<Uuid, Job>,
    tool_executions: Vec<ToolExecution>,
    audio_artifacts: HashMap<Uuid, AudioArtifact>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned mutex means a panic mid-mutation; propagating the
        // poison as a panic here is the only sound option.
        self.state.lock().expect("memory store mutex poisoned")
    }
}

fn in_window(at: DateTime<Utc>, window: &UsageWindow) -> bool {
    window.from.is_none_or(|from| at >= from) && window.to.is_none_or(|to| at < to)
}

fn add_event(totals: &mut UsageTotals, event: &UsageEvent) {
    totals.event_count += 1;
    totals.tokens_in += event.tokens_in;
    totals.tokens_out += event.tokens_out;
    totals.total_tokens += event.total_tokens;
    totals.cost_cents += event.cost_cents;
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn create_tenant(&self, name: &str, email: &str) -> Result<Tenant> {
        let mut state = self.lock();
        if state.tenants.values().any(|t| t.email == email) {
            return Err(Error::Conflict(format!(
                "tenant with email {} already exists",
                email
            )));
        }
        let tenant = Tenant {
            id: TenantId::new(),
            name: name.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        state.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, id: TenantId) -> Result<Tenant> {
        self.lock()
            .tenants
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound("tenant".to_string()))
    }

    async fn create_api_key(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        key_hash: &str,
        role: ApiKeyRole,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKey> {
        let mut state = self.lock();
        if !state.tenants.contains_key(&tenant_id) {
            return Err(Error::NotFound("tenant".to_string()));
        }
        if state.api_keys.values().any(|k| k.key_hash == key_hash) {
            return Err(Error::Conflict("api key hash collision".to_string()));
        }
        let key = ApiKey {
            id: Uuid::new_v4(),
            tenant_id,
            prefix: prefix.to_string(),
            key_hash: key_hash.to_string(),
            role,
            created_at: Utc::now(),
            expires_at,
            revoked_at: None,
            last_used_at: None,
        };
        state.api_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .lock()
            .api_keys
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned())
    }

    async fn touch_api_key(&self, id: Uuid) -> Result<()> {
        if let Some(key) = self.lock().api_keys.get_mut(&id) {
            key.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn revoke_api_key(&self, tenant_id: TenantId, id: Uuid) -> Result<ApiKey> {
        let mut state = self.lock();
        let key = state
            .api_keys
            .get_mut(&id)
            .filter(|k| k.tenant_id == tenant_id)
            .ok_or_else(|| Error::NotFound("api key".to_string()))?;
        if key.revoked_at.is_none() {
            key.revoked_at = Some(Utc::now());
        }
        Ok(key.clone())
    }

    async fn list_api_keys(&self, tenant_id: TenantId) -> Result<Vec<ApiKey>> {
        let mut keys: Vec<ApiKey> = self
            .lock()
            .api_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.created_at);
        Ok(keys)
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn create_agent(&self, new: NewAgent) -> Result<Agent> {
        let mut state = self.lock();
        if !state.tenants.contains_key(&new.tenant_id) {
            return Err(Error::NotFound("tenant".to_string()));
        }
        let now = Utc::now();
        let agent = Agent {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            name: new.name,
            description: new.description,
            primary_provider: new.primary_provider,
            fallback_provider: new.fallback_provider,
            system_prompt: new.system_prompt,
            temperature: new.temperature,
            max_tokens: new.max_tokens,
            enabled_tools: new.enabled_tools,
            voice_enabled: new.voice_enabled,
            voice_config: new.voice_config,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, tenant_id: TenantId, id: Uuid) -> Result<Agent> {
        self.lock()
            .agents
            .get(&id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("agent".to_string()))
    }

    async fn list_agents(&self, tenant_id: TenantId) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .lock()
            .agents
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn update_agent(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        update: AgentUpdate,
    ) -> Result<Agent> {
        let mut state = self.lock();
        let agent = state
            .agents
            .get_mut(&id)
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or_else(|| Error::NotFound("agent".to_string()))?;

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
        agent.updated_at = Utc::now();
        Ok(agent.clone())
    }

    async fn delete_agent(&self, tenant_id: TenantId, id: Uuid) -> Result<()> {
        let mut state = self.lock();
        let agent = state
            .agents
            .get_mut(&id)
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or_else(|| Error::NotFound("agent".to_string()))?;
        agent.is_active = false;
        agent.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_session(&self, new: NewSession) -> Result<Session> {
        let mut state = self.lock();
        if !state
            .agents
            .get(&new.agent_id)
            .is_some_and(|a| a.tenant_id == new.tenant_id)
        {
            return Err(Error::NotFound("agent".to_string()));
        }

        // One ACTIVE session per (tenant, agent, customer, demo): an existing
        // match is returned unchanged.
        if let Some(existing) = state.sessions.values().find(|s| {
            s.tenant_id == new.tenant_id
                && s.agent_id == new.agent_id
                && s.customer_id == new.customer_id
                && s.demo_mode == new.demo_mode
                && s.status == SessionStatus::Active
        }) {
            return Ok(existing.clone());
        }

        let session = Session {
            id: SessionId::new(),
            tenant_id: new.tenant_id,
            agent_id: new.agent_id,
            customer_id: new.customer_id,
            channel: new.channel,
            status: SessionStatus::Active,
            demo_mode: new.demo_mode,
            metadata: new.metadata,
            created_at: Utc::now(),
            ended_at: None,
        };
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, tenant_id: TenantId, id: SessionId) -> Result<Session> {
        self.lock()
            .sessions
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("session".to_string()))
    }

    async fn list_sessions(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .lock()
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn end_session(&self, tenant_id: TenantId, id: SessionId) -> Result<Session> {
        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .ok_or_else(|| Error::NotFound("session".to_string()))?;
        if session.status == SessionStatus::Active {
            session.status = SessionStatus::Ended;
            session.ended_at = Some(Utc::now());
        }
        Ok(session.clone())
    }

    async fn set_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()> {
        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound("session".to_string()))?;
        session.status = status;
        if status != SessionStatus::Active && session.ended_at.is_none() {
            session.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn next_sequence(&self, session_id: SessionId) -> Result<i32> {
        let state = self.lock();
        if !state.sessions.contains_key(&session_id) {
            return Err(Error::NotFound("session".to_string()));
        }
        let max = state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .map(|m| m.sequence_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let mut state = self.lock();
        if !state.sessions.contains_key(&new.session_id) {
            return Err(Error::NotFound("session".to_string()));
        }
        if state
            .messages
            .iter()
            .any(|m| m.session_id == new.session_id && m.sequence_number == new.sequence_number)
        {
            return Err(Error::Conflict(format!(
                "sequence number {} already used in session",
                new.sequence_number
            )));
        }
        if let Some(key) = &new.idempotency_key
            && state
                .messages
                .iter()
                .any(|m| m.session_id == new.session_id && m.idempotency_key.as_ref() == Some(key))
        {
            return Err(Error::Conflict(format!(
                "idempotency key {} already used in session",
                key
            )));
        }

        let message = Message {
            id: Uuid::new_v4(),
            session_id: new.session_id,
            sequence_number: new.sequence_number,
            idempotency_key: new.idempotency_key,
            role: new.role,
            content: new.content,
            tool_calls: new.tool_calls,
            provider_call_id: new.provider_call_id,
            audio_artifact_id: new.audio_artifact_id,
            created_at: Utc::now(),
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, session_id: SessionId, limit: i64) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .lock()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.sequence_number);
        let skip = messages.len().saturating_sub(limit.max(0) as usize);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn count_messages(&self, session_id: SessionId) -> Result<i64> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .count() as i64)
    }

    async fn find_message_by_idempotency_key(
        &self,
        session_id: SessionId,
        key: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .lock()
            .messages
            .iter()
            .find(|m| m.session_id == session_id && m.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_message_by_sequence(
        &self,
        session_id: SessionId,
        sequence_number: i32,
    ) -> Result<Option<Message>> {
        Ok(self
            .lock()
            .messages
            .iter()
            .find(|m| m.session_id == session_id && m.sequence_number == sequence_number)
            .cloned())
    }

    async fn insert_provider_call(&self, new: NewProviderCall) -> Result<ProviderCall> {
        let mut state = self.lock();
        if !state.sessions.contains_key(&new.session_id) {
            return Err(Error::NotFound("session".to_string()));
        }
        let call = ProviderCall {
            id: Uuid::new_v4(),
            session_id: new.session_id,
            correlation_id: new.correlation_id,
            provider: new.provider,
            is_fallback: new.is_fallback,
            tokens_in: new.tokens_in,
            tokens_out: new.tokens_out,
            latency_ms: new.latency_ms,
            status: new.status,
            error_code: new.error_code,
            error_message: new.error_message,
            attempt_number: new.attempt_number,
            billed: false,
            created_at: Utc::now(),
        };
        state.provider_calls.insert(call.id, call.clone());
        Ok(call)
    }

    async fn get_provider_call(&self, id: Uuid) -> Result<ProviderCall> {
        self.lock()
            .provider_calls
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound("provider call".to_string()))
    }

    async fn list_provider_calls(&self, session_id: SessionId) -> Result<Vec<ProviderCall>> {
        let mut calls: Vec<ProviderCall> = self
            .lock()
            .provider_calls
            .values()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect();
        calls.sort_by_key(|c| (c.created_at, c.attempt_number));
        Ok(calls)
    }

    async fn insert_tool_execution(&self, new: NewToolExecution) -> Result<ToolExecution> {
        let mut state = self.lock();
        let execution = ToolExecution {
            id: Uuid::new_v4(),
            session_id: new.session_id,
            message_id: new.message_id,
            correlation_id: new.correlation_id,
            tool_name: new.tool_name,
            tool_input: new.tool_input,
            tool_output: new.tool_output,
            status: new.status,
            error_message: new.error_message,
            latency_ms: new.latency_ms,
            cost_cents: new.cost_cents,
            created_at: Utc::now(),
        };
        state.tool_executions.push(execution.clone());
        Ok(execution)
    }

    async fn insert_audio_artifact(&self, new: NewAudioArtifact) -> Result<AudioArtifact> {
        let mut state = self.lock();
        if !state.sessions.contains_key(&new.session_id) {
            return Err(Error::NotFound("session".to_string()));
        }
        let artifact = AudioArtifact {
            id: Uuid::new_v4(),
            session_id: new.session_id,
            artifact_type: new.artifact_type,
            file_path: new.file_path,
            file_size: new.file_size,
            duration_ms: new.duration_ms,
            format: new.format,
            sample_rate: new.sample_rate,
            provider: new.provider,
            transcript: new.transcript,
            latency_ms: new.latency_ms,
            created_at: Utc::now(),
        };
        state.audio_artifacts.insert(artifact.id, artifact.clone());
        Ok(artifact)
    }

    async fn get_audio_artifact(&self, session_id: SessionId, id: Uuid) -> Result<AudioArtifact> {
        self.lock()
            .audio_artifacts
            .get(&id)
            .filter(|a| a.session_id == session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("audio artifact".to_string()))
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn mark_billed(&self, provider_call_id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        let call = state
            .provider_calls
            .get_mut(&provider_call_id)
            .ok_or_else(|| Error::NotFound("provider call".to_string()))?;
        if call.billed {
            return Ok(false);
        }
        call.billed = true;
        Ok(true)
    }

    async fn insert_usage_event(&self, new: NewUsageEvent) -> Result<Option<UsageEvent>> {
        let mut state = self.lock();
        if state
            .usage_events
            .iter()
            .any(|e| e.provider_call_id == new.provider_call_id)
        {
            return Ok(None);
        }
        let event = UsageEvent {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            agent_id: new.agent_id,
            session_id: new.session_id,
            provider_call_id: new.provider_call_id,
            provider: new.provider,
            tokens_in: new.tokens_in,
            tokens_out: new.tokens_out,
            total_tokens: new.tokens_in + new.tokens_out,
            cost_cents: new.cost_cents,
            pricing_snapshot: new.pricing_snapshot,
            created_at: Utc::now(),
        };
        state.usage_events.push(event.clone());
        Ok(Some(event))
    }

    async fn usage_totals(&self, tenant_id: TenantId, window: UsageWindow) -> Result<UsageTotals> {
        let state = self.lock();
        let mut totals = UsageTotals::default();
        for event in state
            .usage_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && in_window(e.created_at, &window))
        {
            add_event(&mut totals, event);
        }
        Ok(totals)
    }

    async fn usage_breakdown(
        &self,
        tenant_id: TenantId,
        group_by: UsageGroupBy,
        window: UsageWindow,
    ) -> Result<Vec<UsageBucket>> {
        let state = self.lock();
        let mut buckets: HashMap<String, UsageTotals> = HashMap::new();
        for event in state
            .usage_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && in_window(e.created_at, &window))
        {
            let key = match group_by {
                UsageGroupBy::Provider => event.provider.to_string(),
                UsageGroupBy::Agent => event.agent_id.to_string(),
                UsageGroupBy::Day => event.created_at.format("%Y-%m-%d").to_string(),
            };
            add_event(buckets.entry(key).or_default(), event);
        }
        let mut out: Vec<UsageBucket> = buckets
            .into_iter()
            .map(|(key, totals)| UsageBucket { key, totals })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn top_agents(&self, tenant_id: TenantId, limit: i64) -> Result<Vec<AgentUsage>> {
        let state = self.lock();
        let mut by_agent: HashMap<Uuid, UsageTotals> = HashMap::new();
        for event in state
            .usage_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
        {
            add_event(by_agent.entry(event.agent_id).or_default(), event);
        }
        let mut out: Vec<AgentUsage> = by_agent
            .into_iter()
            .map(|(agent_id, totals)| AgentUsage {
                agent_id,
                agent_name: state.agents.get(&agent_id).map(|a| a.name.clone()),
                totals,
            })
            .collect();
        out.sort_by(|a, b| b.totals.cost_cents.cmp(&a.totals.cost_cents));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn count_usage_events_for_call(&self, provider_call_id: Uuid) -> Result<i64> {
        Ok(self
            .lock()
            .usage_events
            .iter()
            .filter(|e| e.provider_call_id == provider_call_id)
            .count() as i64)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue_job(&self, new: NewJob) -> Result<Job> {
        let mut state = self.lock();
        if let Some(key) = &new.idempotency_key
            && let Some(existing) = state
                .jobs
                .values()
                .find(|j| j.tenant_id == new.tenant_id && j.idempotency_key.as_ref() == Some(key))
        {
            return Ok(existing.clone());
        }
        let job = Job {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            job_type: new.job_type,
            idempotency_key: new.idempotency_key,
            input: new.input,
            output: None,
            status: JobStatus::Pending,
            progress: 0,
            error_message: None,
            last_error: None,
            callback_url: new.callback_url,
            callback_sent: false,
            locked_at: None,
            locked_by: None,
            lock_expires_at: None,
            attempts: 0,
            max_attempts: new.max_attempts,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, tenant_id: TenantId, id: Uuid) -> Result<Job> {
        self.lock()
            .jobs
            .get(&id)
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("job".to_string()))
    }

    async fn list_jobs(&self, tenant_id: TenantId, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn claim_job(&self, worker_id: &str, lease: Duration) -> Result<Option<Job>> {
        let mut state = self.lock();
        let now = Utc::now();
        let candidate = state
            .jobs
            .values()
            .filter(|j| j.is_claimable(now))
            .min_by_key(|j| j.created_at)
            .map(|j| j.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let job = state.jobs.get_mut(&id).expect("candidate id exists");
        job.status = JobStatus::Processing;
        job.locked_at = Some(now);
        job.locked_by = Some(worker_id.to_string());
        job.lock_expires_at = Some(now + lease);
        job.attempts += 1;
        job.started_at = job.started_at.or(Some(now));
        Ok(Some(job.clone()))
    }

    async fn complete_job(&self, id: Uuid, output: serde_json::Value) -> Result<Job> {
        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound("job".to_string()))?;
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.output = Some(output);
        job.completed_at = Some(Utc::now());
        job.locked_at = None;
        job.locked_by = None;
        job.lock_expires_at = None;
        Ok(job.clone())
    }

    async fn fail_job_attempt(&self, id: Uuid, error: &str) -> Result<Job> {
        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound("job".to_string()))?;
        job.last_error = Some(error.to_string());
        if job.attempts < job.max_attempts {
            job.status = JobStatus::Pending;
            job.locked_at = None;
            job.locked_by = None;
            job.lock_expires_at = None;
        } else {
            job.status = JobStatus::Failed;
            job.error_message = Some(error.to_string());
            job.completed_at = Some(Utc::now());
            job.locked_at = None;
            job.locked_by = None;
            job.lock_expires_at = None;
        }
        Ok(job.clone())
    }

    async fn set_job_progress(&self, id: Uuid, progress: i16) -> Result<()> {
        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound("job".to_string()))?;
        job.progress = progress.clamp(0, 100);
        Ok(())
    }

    async fn mark_callback_sent(&self, id: Uuid) -> Result<()> {
        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound("job".to_string()))?;
        job.callback_sent = true;
        Ok(())
    }

    async fn recover_expired_jobs(&self) -> Result<u64> {
        let mut state = self.lock();
        let now = Utc::now();
        let mut recovered = 0;
        for job in state.jobs.values_mut() {
            if job.status == JobStatus::Processing
                && job.lock_expires_at.is_some_and(|exp| exp < now)
            {
                job.status = JobStatus::Pending;
                job.locked_at = None;
                job.locked_by = None;
                job.lock_expires_at = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}
