//! The message pipeline
//!
//! End-to-end orchestration of one user message:
//! idempotency short-circuit, session lock, history assembly, provider
//! dispatch, the tool-call loop, transcript persistence, billing, and
//! guaranteed lock release. Terminal failure at any step retains the state
//! persisted before it.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    chat::{ChatMessage, ChatRequest, ToolSpec},
    lock::SessionLock,
    store::{AgentStore, ConversationStore, NewMessage, NewProviderCall, Store},
    types::{
        Agent, CallStatus, Message, MessageRole, ProviderCall, ProviderId, Session, SessionId,
        SessionStatus, TenantId,
    },
};
use vocalbridge_providers::orchestrator::{DispatchOutcome, DispatchSuccess, Orchestrator};
use vocalbridge_tools::{ToolContext, ToolRegistry};

use crate::billing::BillingRecorder;
use crate::history::{EncodedToolResult, MAX_HISTORY_MESSAGES, to_chat_messages};

/// Tool rounds allowed per user turn before the pipeline gives up.
pub const MAX_TOOL_ROUNDS: u32 = 4;

const TOOL_BUDGET_NOTE: &str =
    "I had to stop before completing every requested lookup; the tool budget \
     for this message was exhausted.";

/// One inbound user message.
#[derive(Debug, Clone)]
pub struct MessageInput {
    pub content: String,
    pub idempotency_key: Option<String>,
    pub correlation_id: Option<String>,
    /// Set by the voice path to link the stored audio to the user turn.
    pub audio_artifact_id: Option<Uuid>,
}

impl MessageInput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            idempotency_key: None,
            correlation_id: None,
            audio_artifact_id: None,
        }
    }
}

/// Dispatch metadata returned alongside the assistant message.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplyMetadata {
    pub provider: ProviderId,
    #[serde(rename = "tokensIn")]
    pub tokens_in: i64,
    #[serde(rename = "tokensOut")]
    pub tokens_out: i64,
    #[serde(rename = "latencyMs")]
    pub latency_ms: i64,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    #[serde(rename = "usedFallback")]
    pub used_fallback: bool,
}

/// The assistant's final message plus metadata.
#[derive(Debug, Clone)]
pub struct MessageReply {
    pub message: Message,
    pub metadata: ReplyMetadata,
}

pub struct MessagePipeline {
    store: Arc<dyn Store>,
    lock: Arc<dyn SessionLock>,
    orchestrator: Arc<Orchestrator>,
    tools: Arc<ToolRegistry>,
    billing: BillingRecorder,
    max_history: i64,
    max_tool_rounds: u32,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn Store>,
        lock: Arc<dyn SessionLock>,
        orchestrator: Arc<Orchestrator>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let billing = BillingRecorder::new(store.clone());
        Self {
            store,
            lock,
            orchestrator,
            tools,
            billing,
            max_history: MAX_HISTORY_MESSAGES,
            max_tool_rounds: MAX_TOOL_ROUNDS,
        }
    }

    /// Process one user message against a session.
    pub async fn send_message(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        input: MessageInput,
    ) -> Result<MessageReply> {
        // Idempotency pre-check: a replayed key returns the stored response
        // with no lock, no provider call, and no billing.
        if let Some(key) = &input.idempotency_key
            && let Some(reply) = self.try_replay(session_id, key).await?
        {
            info!(session_id = %session_id, "Idempotent replay served from transcript");
            return Ok(reply);
        }

        // One in-flight message per session; losers get CONFLICT. The guard
        // releases on every exit path below, including errors.
        let _guard = self.lock.try_acquire(session_id).await?;

        let session = self.store.get_session(tenant_id, session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(Error::Validation("session is not active".to_string()));
        }
        let agent = self.store.get_agent(tenant_id, session.agent_id).await?;

        let correlation_id = input
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Compose the request from history plus the new user turn.
        let rows = self.store.list_messages(session_id, self.max_history).await?;
        let mut messages = to_chat_messages(&rows);
        messages.push(ChatMessage::user(input.content.clone()));
        let catalog = self.tools.catalog(&agent.enabled_tools);
        let request = self.compose(&agent, messages, catalog.clone());

        // Persist the user turn, consuming the idempotency key. A conflict
        // here means a concurrent caller raced us with the same key.
        let sequence = self.store.next_sequence(session_id).await?;
        let user_message = match self
            .store
            .insert_message(NewMessage {
                session_id,
                sequence_number: sequence,
                idempotency_key: input.idempotency_key.clone(),
                role: MessageRole::User,
                content: input.content.clone(),
                tool_calls: vec![],
                provider_call_id: None,
                audio_artifact_id: input.audio_artifact_id,
            })
            .await
        {
            Ok(message) => message,
            Err(Error::Conflict(reason)) if input.idempotency_key.is_some() => {
                debug!(session_id = %session_id, reason = %reason, "Lost idempotency race, re-driving replay");
                let key = input.idempotency_key.as_deref().unwrap_or_default();
                return self
                    .try_replay(session_id, key)
                    .await?
                    .ok_or(Error::Conflict(reason));
            }
            Err(err) => return Err(err),
        };
        debug!(
            session_id = %session_id,
            sequence = user_message.sequence_number,
            correlation_id = %correlation_id,
            "User message persisted"
        );

        // First provider round. Every attempt is persisted, then failure
        // surfaces; the user message (and its consumed key) remains.
        let outcome = self
            .orchestrator
            .dispatch(agent.primary_provider, agent.fallback_provider, &request)
            .await;
        let (mut billable, success_row) =
            self.persist_dispatch(session_id, &correlation_id, &outcome).await?;
        let mut success = outcome.result?;
        let mut final_call = success_row
            .ok_or_else(|| Error::Internal("successful dispatch produced no call row".to_string()))?;

        // Tool-call loop: persist the interim assistant turn and one TOOL
        // message per call, then ask the provider to finish with the results
        // in context.
        let mut rounds = 0;
        let mut capped = false;
        while !success.response.tool_calls.is_empty() {
            if rounds >= self.max_tool_rounds {
                warn!(
                    session_id = %session_id,
                    rounds,
                    "Tool budget exhausted before the model stopped requesting calls"
                );
                capped = true;
                break;
            }
            rounds += 1;

            let interim = self
                .persist_assistant(session_id, &success, Some(final_call.id))
                .await?;
            self.run_tool_calls(&session, &agent, &interim, &correlation_id)
                .await?;

            // Rebuild history so the TOOL rows are in context, then send the
            // follow-up with an empty user turn.
            let rows = self.store.list_messages(session_id, self.max_history).await?;
            let mut messages = to_chat_messages(&rows);
            messages.push(ChatMessage::user(String::new()));
            let follow_up = self.compose(&agent, messages, catalog.clone());

            let outcome = self
                .orchestrator
                .dispatch(agent.primary_provider, agent.fallback_provider, &follow_up)
                .await;
            let (rows, success_row) = self
                .persist_dispatch(session_id, &correlation_id, &outcome)
                .await?;
            billable.extend(rows);
            // On follow-up failure the interim assistant and TOOL messages
            // remain as the record of partial work.
            success = outcome.result?;
            final_call = success_row.ok_or_else(|| {
                Error::Internal("successful dispatch produced no call row".to_string())
            })?;
        }

        // Final assistant turn.
        let sequence = self.store.next_sequence(session_id).await?;
        let content = if capped {
            TOOL_BUDGET_NOTE.to_string()
        } else {
            success.response.content.clone()
        };
        let final_message = self
            .store
            .insert_message(NewMessage {
                session_id,
                sequence_number: sequence,
                idempotency_key: None,
                role: MessageRole::Assistant,
                content,
                tool_calls: if capped {
                    vec![]
                } else {
                    success.response.tool_calls.clone()
                },
                provider_call_id: Some(final_call.id),
                audio_artifact_id: None,
            })
            .await?;

        // Exactly-once billing per successful call; demo sessions skip.
        for call in billable.iter().filter(|c| c.status == CallStatus::Success) {
            self.billing.record(&session, agent.id, call).await?;
        }

        info!(
            session_id = %session_id,
            correlation_id = %correlation_id,
            provider = %final_call.provider,
            used_fallback = final_call.is_fallback,
            tool_rounds = rounds,
            "Message processed"
        );

        Ok(MessageReply {
            metadata: ReplyMetadata {
                provider: final_call.provider,
                tokens_in: final_call.tokens_in,
                tokens_out: final_call.tokens_out,
                latency_ms: final_call.latency_ms,
                correlation_id,
                used_fallback: final_call.is_fallback,
            },
            message: final_message,
        })
    }

    fn compose(
        &self,
        agent: &Agent,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
    ) -> ChatRequest {
        ChatRequest {
            system_prompt: agent.system_prompt.clone(),
            messages,
            temperature: agent.temperature,
            max_tokens: agent.max_tokens,
            tools,
        }
    }

    /// Serve a repeated idempotency key from the transcript: the reply is
    /// the last ASSISTANT message of the turn that consumed the key.
    async fn try_replay(&self, session_id: SessionId, key: &str) -> Result<Option<MessageReply>> {
        let Some(user) = self
            .store
            .find_message_by_idempotency_key(session_id, key)
            .await?
        else {
            return Ok(None);
        };

        let mut sequence = user.sequence_number + 1;
        let mut reply: Option<Message> = None;
        loop {
            match self
                .store
                .find_message_by_sequence(session_id, sequence)
                .await?
            {
                Some(message) if message.role == MessageRole::User => break,
                Some(message) => {
                    if message.role == MessageRole::Assistant {
                        reply = Some(message);
                    }
                    sequence += 1;
                }
                None => break,
            }
        }

        match reply {
            Some(message) => Ok(Some(self.reply_from(message).await?)),
            // The key was consumed but the provider round never succeeded;
            // the original caller saw a provider error and so does the replay.
            None => Err(Error::Provider {
                provider: None,
                message: "the previous attempt with this idempotency key failed before a response \
                          was produced"
                    .to_string(),
                status: None,
                retryable: false,
            }),
        }
    }

    async fn reply_from(&self, message: Message) -> Result<MessageReply> {
        let call_id = message.provider_call_id.ok_or_else(|| {
            Error::Internal("assistant message has no provider call".to_string())
        })?;
        let call = self.store.get_provider_call(call_id).await?;
        Ok(MessageReply {
            metadata: ReplyMetadata {
                provider: call.provider,
                tokens_in: call.tokens_in,
                tokens_out: call.tokens_out,
                latency_ms: call.latency_ms,
                correlation_id: call.correlation_id,
                used_fallback: call.is_fallback,
            },
            message,
        })
    }

    /// Persist every attempt of a dispatch as a provider-call row, returning
    /// the rows plus the successful one when the dispatch succeeded.
    async fn persist_dispatch(
        &self,
        session_id: SessionId,
        correlation_id: &str,
        outcome: &DispatchOutcome,
    ) -> Result<(Vec<ProviderCall>, Option<ProviderCall>)> {
        let mut rows = Vec::with_capacity(outcome.attempts.len());
        for attempt in &outcome.attempts {
            let row = self
                .store
                .insert_provider_call(NewProviderCall {
                    session_id,
                    correlation_id: correlation_id.to_string(),
                    provider: attempt.provider,
                    is_fallback: attempt.is_fallback,
                    tokens_in: attempt.tokens_in,
                    tokens_out: attempt.tokens_out,
                    latency_ms: attempt.latency_ms,
                    status: attempt.status,
                    error_code: attempt.error_code.clone(),
                    error_message: attempt.error_message.clone(),
                    attempt_number: attempt.attempt_number,
                })
                .await?;
            rows.push(row);
        }
        let success = rows.iter().find(|r| r.status == CallStatus::Success).cloned();
        Ok((rows, success))
    }

    async fn persist_assistant(
        &self,
        session_id: SessionId,
        success: &DispatchSuccess,
        provider_call_id: Option<Uuid>,
    ) -> Result<Message> {
        let sequence = self.store.next_sequence(session_id).await?;
        self.store
            .insert_message(NewMessage {
                session_id,
                sequence_number: sequence,
                idempotency_key: None,
                role: MessageRole::Assistant,
                content: success.response.content.clone(),
                tool_calls: success.response.tool_calls.clone(),
                provider_call_id,
                audio_artifact_id: None,
            })
            .await
    }

    /// Execute each requested tool call and persist one TOOL message per
    /// call, its content encoding `{id, result, error?}`.
    async fn run_tool_calls(
        &self,
        session: &Session,
        agent: &Agent,
        interim: &Message,
        correlation_id: &str,
    ) -> Result<()> {
        let ctx = ToolContext {
            tenant_id: session.tenant_id,
            session_id: session.id,
            message_id: Some(interim.id),
            correlation_id: correlation_id.to_string(),
        };

        for call in &interim.tool_calls {
            let encoded = match self
                .tools
                .invoke(self.store.as_ref(), &agent.enabled_tools, call, &ctx)
                .await
            {
                Ok(invocation) => EncodedToolResult {
                    id: call.id.clone(),
                    result: invocation.output.unwrap_or(serde_json::Value::Null),
                    error: invocation.error,
                },
                // FORBIDDEN / NOT_FOUND become an error result for the
                // model rather than failing the whole message.
                Err(err) => EncodedToolResult {
                    id: call.id.clone(),
                    result: serde_json::Value::Null,
                    error: Some(err.to_string()),
                },
            };

            let sequence = self.store.next_sequence(session.id).await?;
            self.store
                .insert_message(NewMessage {
                    session_id: session.id,
                    sequence_number: sequence,
                    idempotency_key: None,
                    role: MessageRole::Tool,
                    content: encoded.encode(),
                    tool_calls: vec![],
                    provider_call_id: None,
                    audio_artifact_id: None,
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vocalbridge_core::pricing;
    use vocalbridge_core::provider::ChatProvider;
    use vocalbridge_core::store::{
        AgentStore, BillingStore, NewAgent, NewSession, TenantStore,
    };
    use vocalbridge_core::types::Channel;
    use vocalbridge_providers::{
        FaultProfile, RetryPolicy, VendorAAdapter, VendorBAdapter, orchestrator::Orchestrator,
    };
    use vocalbridge_store::{InMemorySessionLock, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        pipeline: MessagePipeline,
        tenant_id: TenantId,
        agent: Agent,
    }

    async fn fixture_with(
        vendor_a: FaultProfile,
        vendor_b: FaultProfile,
        fallback: Option<ProviderId>,
        enabled_tools: Vec<String>,
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.create_tenant("Acme", "ops@acme.test").await.unwrap();
        let agent = store
            .create_agent(NewAgent {
                tenant_id: tenant.id,
                name: "support".into(),
                description: None,
                primary_provider: ProviderId::VendorA,
                fallback_provider: fallback,
                system_prompt: "You are a support agent.".into(),
                temperature: 0.7,
                max_tokens: 512,
                enabled_tools,
                voice_enabled: false,
                voice_config: None,
            })
            .await
            .unwrap();

        let providers: HashMap<ProviderId, Arc<dyn ChatProvider>> = HashMap::from([
            (
                ProviderId::VendorA,
                Arc::new(VendorAAdapter::with_faults(vendor_a)) as Arc<dyn ChatProvider>,
            ),
            (
                ProviderId::VendorB,
                Arc::new(VendorBAdapter::with_faults(vendor_b)) as Arc<dyn ChatProvider>,
            ),
        ]);
        let policy = RetryPolicy {
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(4),
            ..RetryPolicy::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(providers, policy));
        let pipeline = MessagePipeline::new(
            store.clone(),
            Arc::new(InMemorySessionLock::new()),
            orchestrator,
            Arc::new(ToolRegistry::with_builtins()),
        );

        Fixture {
            store,
            pipeline,
            tenant_id: tenant.id,
            agent,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(
            FaultProfile::none(),
            FaultProfile::none(),
            Some(ProviderId::VendorB),
            vec!["InvoiceLookup".into()],
        )
        .await
    }

    async fn open_session(fixture: &Fixture, demo: bool) -> Session {
        fixture
            .store
            .create_session(NewSession {
                tenant_id: fixture.tenant_id,
                agent_id: fixture.agent.id,
                customer_id: "cust-1".into(),
                channel: Channel::Chat,
                demo_mode: demo,
                metadata: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_simple_message_persists_user_and_assistant() {
        let fx = fixture().await;
        let session = open_session(&fx, false).await;

        let reply = fx
            .pipeline
            .send_message(fx.tenant_id, session.id, MessageInput::text("hello there"))
            .await
            .unwrap();

        assert_eq!(reply.message.role, MessageRole::Assistant);
        assert!(!reply.message.content.is_empty());
        assert_eq!(reply.metadata.provider, ProviderId::VendorA);
        assert!(!reply.metadata.used_fallback);

        let messages = fx.store.list_messages(session.id, 50).await.unwrap();
        let sequences: Vec<i32> = messages.iter().map(|m| m.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);

        // One successful call, billed exactly once.
        let calls = fx.store.list_provider_calls(session.id).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            fx.store
                .count_usage_events_for_call(calls[0].id)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_idempotent_replay_returns_same_response() {
        let fx = fixture().await;
        let session = open_session(&fx, false).await;
        let input = MessageInput {
            content: "hello".into(),
            idempotency_key: Some("K".into()),
            correlation_id: None,
            audio_artifact_id: None,
        };

        let first = fx
            .pipeline
            .send_message(fx.tenant_id, session.id, input.clone())
            .await
            .unwrap();
        let count_before = fx.store.count_messages(session.id).await.unwrap();

        let second = fx
            .pipeline
            .send_message(fx.tenant_id, session.id, input)
            .await
            .unwrap();

        assert_eq!(first.message.id, second.message.id);
        assert_eq!(first.message.content, second.message.content);
        assert_eq!(first.metadata.provider, second.metadata.provider);
        assert_eq!(first.metadata.tokens_in, second.metadata.tokens_in);
        assert_eq!(first.metadata.correlation_id, second.metadata.correlation_id);
        assert_eq!(
            fx.store.count_messages(session.id).await.unwrap(),
            count_before
        );

        // The replay billed nothing new.
        let calls = fx.store.list_provider_calls(session.id).await.unwrap();
        assert_eq!(calls.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_loop_transcript_and_billing() {
        let fx = fixture().await;
        let session = open_session(&fx, false).await;

        let reply = fx
            .pipeline
            .send_message(
                fx.tenant_id,
                session.id,
                MessageInput::text("what's the status of order #12345?"),
            )
            .await
            .unwrap();

        // USER, ASSISTANT-with-tool-calls, TOOL, ASSISTANT-final.
        let messages = fx.store.list_messages(session.id, 50).await.unwrap();
        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::Tool,
                MessageRole::Assistant
            ]
        );
        assert_eq!(messages[1].tool_calls.len(), 1);
        assert!(messages[3].tool_calls.is_empty());
        assert!(reply.message.content.contains("SHIPPED"), "final answer: {}", reply.message.content);

        // Two successful provider calls, one usage event each.
        let calls = fx.store.list_provider_calls(session.id).await.unwrap();
        assert_eq!(calls.len(), 2);
        let mut expected_cost = 0;
        for call in &calls {
            assert_eq!(call.status, CallStatus::Success);
            assert_eq!(
                fx.store.count_usage_events_for_call(call.id).await.unwrap(),
                1
            );
            expected_cost += pricing::cost_cents(call.provider, call.tokens_in, call.tokens_out);
        }
        let totals = fx
            .store
            .usage_totals(fx.tenant_id, Default::default())
            .await
            .unwrap();
        assert_eq!(totals.cost_cents, expected_cost);
        assert_eq!(totals.event_count, 2);
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back() {
        let fx = fixture_with(
            FaultProfile::always_failing(),
            FaultProfile::none(),
            Some(ProviderId::VendorB),
            vec![],
        )
        .await;
        let session = open_session(&fx, false).await;

        let reply = fx
            .pipeline
            .send_message(fx.tenant_id, session.id, MessageInput::text("hello"))
            .await
            .unwrap();

        assert!(reply.metadata.used_fallback);
        assert_eq!(reply.metadata.provider, ProviderId::VendorB);

        let calls = fx.store.list_provider_calls(session.id).await.unwrap();
        let failed_a = calls
            .iter()
            .filter(|c| c.provider == ProviderId::VendorA && c.status == CallStatus::Failed)
            .count();
        let ok_b = calls
            .iter()
            .filter(|c| c.provider == ProviderId::VendorB && c.status == CallStatus::Success)
            .count();
        assert!(failed_a >= 3, "expected >=3 failed VendorA attempts, saw {}", failed_a);
        assert!(ok_b >= 1);

        // Only the successful call produced a usage event.
        let totals = fx
            .store
            .usage_totals(fx.tenant_id, Default::default())
            .await
            .unwrap();
        assert_eq!(totals.event_count, 1);
    }

    #[tokio::test]
    async fn test_total_failure_keeps_user_message_and_key() {
        let fx = fixture_with(
            FaultProfile::always_failing(),
            FaultProfile::always_failing(),
            Some(ProviderId::VendorB),
            vec![],
        )
        .await;
        let session = open_session(&fx, false).await;
        let input = MessageInput {
            content: "hello".into(),
            idempotency_key: Some("K".into()),
            correlation_id: None,
            audio_artifact_id: None,
        };

        let err = fx
            .pipeline
            .send_message(fx.tenant_id, session.id, input.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));

        // The user message remains; no assistant message was persisted.
        let messages = fx.store.list_messages(session.id, 50).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);

        // Attempts were recorded for analytics despite the failure.
        let calls = fx.store.list_provider_calls(session.id).await.unwrap();
        assert_eq!(calls.len(), 6);
        assert!(calls.iter().all(|c| c.status != CallStatus::Success));

        // The key stays consumed: a replay reports the earlier failure
        // rather than re-driving the provider.
        let err = fx
            .pipeline
            .send_message(fx.tenant_id, session.id, input)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        assert_eq!(fx.store.count_messages(session.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_inactive_session_is_rejected() {
        let fx = fixture().await;
        let session = open_session(&fx, false).await;
        fx.store.end_session(fx.tenant_id, session.id).await.unwrap();

        let err = fx
            .pipeline
            .send_message(fx.tenant_id, session.id, MessageInput::text("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_demo_session_skips_billing() {
        let fx = fixture().await;
        let session = open_session(&fx, true).await;

        fx.pipeline
            .send_message(fx.tenant_id, session.id, MessageInput::text("hello"))
            .await
            .unwrap();

        let totals = fx
            .store
            .usage_totals(fx.tenant_id, Default::default())
            .await
            .unwrap();
        assert_eq!(totals.event_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_messages_one_winner() {
        // A slow provider keeps the winner inside the critical section long
        // enough for every other task to contend.
        let slow = FaultProfile {
            simulate_latency: true,
            base_latency_ms: 150..200,
            ..FaultProfile::none()
        };
        let fx = fixture_with(slow, FaultProfile::none(), None, vec![]).await;
        let session = open_session(&fx, false).await;
        let pipeline = Arc::new(fx.pipeline);

        let mut handles = Vec::new();
        for i in 0..5 {
            let pipeline = Arc::clone(&pipeline);
            let tenant_id = fx.tenant_id;
            let session_id = session.id;
            handles.push(tokio::spawn(async move {
                pipeline
                    .send_message(
                        tenant_id,
                        session_id,
                        MessageInput {
                            content: format!("message {}", i),
                            idempotency_key: Some(format!("key-{}", i)),
                            correlation_id: None,
                            audio_artifact_id: None,
                        },
                    )
                    .await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 4);

        // One user turn plus one assistant turn.
        let messages = fx.store.list_messages(session.id, 50).await.unwrap();
        let sequences: Vec<i32> = messages.iter().map(|m| m.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2]);

        // The lock was released: a later message goes through.
        pipeline
            .send_message(fx.tenant_id, session.id, MessageInput::text("again"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tool_audit_row_written() {
        let fx = fixture().await;
        let session = open_session(&fx, false).await;

        fx.pipeline
            .send_message(
                fx.tenant_id,
                session.id,
                MessageInput::text("check invoice 445566 for me"),
            )
            .await
            .unwrap();

        // The TOOL message content carries the encoded result.
        let messages = fx.store.list_messages(session.id, 50).await.unwrap();
        let tool_message = messages
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .expect("tool message persisted");
        let encoded: EncodedToolResult = serde_json::from_str(&tool_message.content).unwrap();
        assert!(encoded.error.is_none());
        assert_eq!(encoded.result["status"], "PROCESSING");
    }

    #[tokio::test]
    async fn test_correlation_id_is_respected_and_persisted() {
        let fx = fixture().await;
        let session = open_session(&fx, false).await;

        let reply = fx
            .pipeline
            .send_message(
                fx.tenant_id,
                session.id,
                MessageInput {
                    content: "hello".into(),
                    idempotency_key: None,
                    correlation_id: Some("corr-abc".into()),
                    audio_artifact_id: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(reply.metadata.correlation_id, "corr-abc");
        let calls = fx.store.list_provider_calls(session.id).await.unwrap();
        assert!(calls.iter().all(|c| c.correlation_id == "corr-abc"));
    }
}
