//! Session lifecycle
//!
//! Create-or-reuse honoring the one-ACTIVE-session rule, session end, and
//! demo sessions for dashboard try-outs. Demo sessions reuse by the demo
//! flag plus a reserved `demo-` customer id, and are never billed.

use std::sync::Arc;

use vocalbridge_core::{
    Error, Result,
    store::{AgentStore, ConversationStore, NewSession, Store},
    types::{Channel, Session, SessionId, TenantId},
};
use uuid::Uuid;

/// Customer ids starting with this prefix are reserved for demo sessions so
/// external callers cannot collide with dashboard try-outs.
pub const DEMO_CUSTOMER_PREFIX: &str = "demo-";

pub struct SessionService {
    store: Arc<dyn Store>,
}

impl SessionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a session, or return the matching ACTIVE session unchanged.
    pub async fn create(
        &self,
        tenant_id: TenantId,
        agent_id: Uuid,
        customer_id: String,
        channel: Channel,
        metadata: Option<serde_json::Value>,
    ) -> Result<Session> {
        if customer_id.trim().is_empty() {
            return Err(Error::Validation("customerId must not be empty".to_string()));
        }
        if customer_id.starts_with(DEMO_CUSTOMER_PREFIX) {
            return Err(Error::Validation(format!(
                "customer ids starting with '{}' are reserved for demo sessions",
                DEMO_CUSTOMER_PREFIX
            )));
        }
        let agent = self.store.get_agent(tenant_id, agent_id).await?;
        if !agent.is_active {
            return Err(Error::Validation("agent is not active".to_string()));
        }

        self.store
            .create_session(NewSession {
                tenant_id,
                agent_id,
                customer_id,
                channel,
                demo_mode: false,
                metadata,
            })
            .await
    }

    /// Create or reuse the demo session for an agent. Demo sessions skip
    /// billing entirely.
    pub async fn create_demo(&self, tenant_id: TenantId, agent_id: Uuid) -> Result<Session> {
        self.store.get_agent(tenant_id, agent_id).await?;
        self.store
            .create_session(NewSession {
                tenant_id,
                agent_id,
                customer_id: format!("{}{}", DEMO_CUSTOMER_PREFIX, tenant_id),
                channel: Channel::Chat,
                demo_mode: true,
                metadata: None,
            })
            .await
    }

    pub async fn get(&self, tenant_id: TenantId, id: SessionId) -> Result<Session> {
        self.store.get_session(tenant_id, id).await
    }

    pub async fn list(&self, tenant_id: TenantId, limit: i64, offset: i64) -> Result<Vec<Session>> {
        self.store.list_sessions(tenant_id, limit, offset).await
    }

    pub async fn end(&self, tenant_id: TenantId, id: SessionId) -> Result<Session> {
        self.store.end_session(tenant_id, id).await
    }
}
