//! Exactly-once usage accounting
//!
//! One usage event per successful provider call in a non-demo session. The
//! conditional `billed` flip is the source of truth; the unique constraint
//! on the usage event's provider-call reference is the second line of
//! defense. Repeated invocations for the same call are safe under concurrent
//! pipelines, job-worker retries, and at-least-once job claims.

use std::sync::Arc;
use tracing::{debug, warn};

use vocalbridge_core::{
    Result, pricing,
    store::{BillingStore, NewUsageEvent, Store},
    types::{CallStatus, ProviderCall, Session},
};
use uuid::Uuid;

pub struct BillingRecorder {
    store: Arc<dyn Store>,
}

impl BillingRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record usage for one provider call. Demo sessions and non-successful
    /// calls are skipped; an already-billed call returns silently.
    pub async fn record(
        &self,
        session: &Session,
        agent_id: Uuid,
        call: &ProviderCall,
    ) -> Result<()> {
        if session.demo_mode {
            debug!(session_id = %session.id, "Demo session, skipping billing");
            return Ok(());
        }
        if call.status != CallStatus::Success {
            return Ok(());
        }

        if !self.store.mark_billed(call.id).await? {
            debug!(provider_call_id = %call.id, "Provider call already billed");
            return Ok(());
        }

        let snapshot = pricing::snapshot_for(call.provider);
        let cost_cents = pricing::cost_cents(call.provider, call.tokens_in, call.tokens_out);
        let event = NewUsageEvent {
            tenant_id: session.tenant_id,
            agent_id,
            session_id: session.id,
            provider_call_id: call.id,
            provider: call.provider,
            tokens_in: call.tokens_in,
            tokens_out: call.tokens_out,
            cost_cents,
            pricing_snapshot: serde_json::to_value(&snapshot)?,
        };

        match self.store.insert_usage_event(event).await? {
            Some(recorded) => {
                debug!(
                    provider_call_id = %call.id,
                    cost_cents = recorded.cost_cents,
                    "Recorded usage event"
                );
            }
            None => {
                // The unique constraint caught a race the billed flag
                // somehow missed. Log and return; never fail the caller.
                warn!(
                    provider_call_id = %call.id,
                    "Usage event already existed despite winning the billed flip"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vocalbridge_core::store::{
        AgentStore, BillingStore, ConversationStore, NewAgent, NewProviderCall, NewSession,
        TenantStore,
    };
    use vocalbridge_core::types::{Agent, Channel, ProviderId, Tenant};
    use vocalbridge_store::MemoryStore;

    async fn fixture(demo: bool) -> (Arc<MemoryStore>, Tenant, Agent, Session, ProviderCall) {
        let store = Arc::new(MemoryStore::new());
        let tenant = store.create_tenant("Acme", "ops@acme.test").await.unwrap();
        let agent = store
            .create_agent(NewAgent {
                tenant_id: tenant.id,
                name: "support".into(),
                description: None,
                primary_provider: ProviderId::VendorA,
                fallback_provider: None,
                system_prompt: "prompt".into(),
                temperature: 0.7,
                max_tokens: 256,
                enabled_tools: vec![],
                voice_enabled: false,
                voice_config: None,
            })
            .await
            .unwrap();
        let session = store
            .create_session(NewSession {
                tenant_id: tenant.id,
                agent_id: agent.id,
                customer_id: "cust-1".into(),
                channel: Channel::Chat,
                demo_mode: demo,
                metadata: None,
            })
            .await
            .unwrap();
        let call = store
            .insert_provider_call(NewProviderCall {
                session_id: session.id,
                correlation_id: "corr-1".into(),
                provider: ProviderId::VendorA,
                is_fallback: false,
                tokens_in: 1000,
                tokens_out: 1000,
                latency_ms: 100,
                status: CallStatus::Success,
                error_code: None,
                error_message: None,
                attempt_number: 1,
            })
            .await
            .unwrap();
        (store, tenant, agent, session, call)
    }

    #[tokio::test]
    async fn test_records_exactly_one_event() {
        let (store, _, agent, session, call) = fixture(false).await;
        let recorder = BillingRecorder::new(store.clone());

        recorder.record(&session, agent.id, &call).await.unwrap();
        recorder.record(&session, agent.id, &call).await.unwrap();

        assert_eq!(store.count_usage_events_for_call(call.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_invocations_single_event() {
        let (store, _, agent, session, call) = fixture(false).await;
        let recorder = Arc::new(BillingRecorder::new(store.clone()));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let recorder = Arc::clone(&recorder);
            let session = session.clone();
            let call = call.clone();
            let agent_id = agent.id;
            handles.push(tokio::spawn(async move {
                recorder.record(&session, agent_id, &call).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count_usage_events_for_call(call.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_demo_session_is_never_billed() {
        let (store, _, agent, session, call) = fixture(true).await;
        let recorder = BillingRecorder::new(store.clone());

        recorder.record(&session, agent.id, &call).await.unwrap();

        assert_eq!(store.count_usage_events_for_call(call.id).await.unwrap(), 0);
        // The billed flag stays down too, so a later non-demo path cannot
        // be confused.
        let call = store.get_provider_call(call.id).await.unwrap();
        assert!(!call.billed);
    }

    #[tokio::test]
    async fn test_failed_call_is_never_billed() {
        let (store, _, agent, session, _) = fixture(false).await;
        let failed = store
            .insert_provider_call(NewProviderCall {
                session_id: session.id,
                correlation_id: "corr-2".into(),
                provider: ProviderId::VendorA,
                is_fallback: false,
                tokens_in: 0,
                tokens_out: 0,
                latency_ms: 40,
                status: CallStatus::Failed,
                error_code: Some("PROVIDER_ERROR".into()),
                error_message: Some("upstream 500".into()),
                attempt_number: 1,
            })
            .await
            .unwrap();
        let recorder = BillingRecorder::new(store.clone());

        recorder.record(&session, agent.id, &failed).await.unwrap();
        assert_eq!(
            store.count_usage_events_for_call(failed.id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_event_carries_pricing_snapshot_and_cost() {
        let (store, tenant, agent, session, call) = fixture(false).await;
        let recorder = BillingRecorder::new(store.clone());
        recorder.record(&session, agent.id, &call).await.unwrap();

        let totals = store
            .usage_totals(tenant.id, Default::default())
            .await
            .unwrap();
        assert_eq!(totals.event_count, 1);
        assert_eq!(totals.total_tokens, 2000);
        assert_eq!(
            totals.cost_cents,
            pricing::cost_cents(ProviderId::VendorA, 1000, 1000)
        );
    }
}
