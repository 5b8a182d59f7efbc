//! Tool registry: register, lookup, and execute tools.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    chat::{ToolCall, ToolSpec},
    store::{ConversationStore, NewToolExecution},
    types::{SessionId, TenantId, ToolStatus},
};

/// What a tool may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccess {
    None,
    SessionOnly,
    TenantReadonly,
    TenantWrite,
}

#[derive(Debug, Clone)]
pub struct ToolPermissions {
    pub data_access: DataAccess,
    pub network_access: bool,
    pub estimated_cost_cents: i64,
}

#[derive(Debug, Clone)]
pub struct ToolLimits {
    pub timeout_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_payload_bytes: 64 * 1024,
        }
    }
}

/// Ambient context handed to every execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub message_id: Option<Uuid>,
    pub correlation_id: String,
}

/// What a tool's `execute` produces.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A named callable unit exposed to agents.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn parameters(&self) -> serde_json::Value;

    fn permissions(&self) -> ToolPermissions;

    fn limits(&self) -> ToolLimits {
        ToolLimits::default()
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutcome>;
}

/// The result of one registry invocation, ready for the caller to turn into
/// a tool-result message. The audit row has already been written.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call_id: String,
    pub status: ToolStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub latency_ms: i64,
    pub cost_cents: i64,
}

/// Registry of tools, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// A registry with every builtin tool registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::invoice_lookup::InvoiceLookup::new()));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// The catalog for one request, restricted to an agent's enabled set.
    pub fn catalog(&self, enabled: &[String]) -> Vec<ToolSpec> {
        enabled
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Execute one tool call under the tool's declared timeout, writing a
    /// ToolExecution audit row for every invocation, including rejected ones.
    ///
    /// Fails with `Error::Forbidden` when the tool is registered but not in
    /// the enabled set, and `Error::NotFound` when it is not registered at
    /// all. Execution failures and timeouts are not errors: they come back
    /// as a `ToolInvocation` whose status says what happened.
    pub async fn invoke(
        &self,
        store: &dyn ConversationStore,
        enabled: &[String],
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<ToolInvocation> {
        let started = Instant::now();

        if !enabled.iter().any(|name| name == &call.name) {
            let err = if self.tools.contains_key(&call.name) {
                Error::Forbidden(format!("tool '{}' is not enabled for this agent", call.name))
            } else {
                Error::NotFound(format!("tool '{}'", call.name))
            };
            self.audit(store, call, ctx, ToolStatus::Failed, None, Some(err.to_string()), 0, 0)
                .await;
            return Err(err);
        }

        let tool = match self.tools.get(&call.name) {
            Some(tool) => tool.clone(),
            None => {
                let err = Error::NotFound(format!("tool '{}'", call.name));
                self.audit(store, call, ctx, ToolStatus::Failed, None, Some(err.to_string()), 0, 0)
                    .await;
                return Err(err);
            }
        };

        let limits = tool.limits();
        let cost_cents = tool.permissions().estimated_cost_cents;
        let budget = Duration::from_millis(limits.timeout_ms);

        let (status, output, error) =
            match tokio::time::timeout(budget, tool.execute(&call.args, ctx)).await {
                Ok(Ok(outcome)) if outcome.success => (ToolStatus::Success, outcome.data, None),
                Ok(Ok(outcome)) => (
                    ToolStatus::Failed,
                    outcome.data,
                    outcome.error.or_else(|| Some("tool reported failure".to_string())),
                ),
                Ok(Err(err)) => (ToolStatus::Failed, None, Some(err.to_string())),
                Err(_) => (
                    ToolStatus::Timeout,
                    None,
                    Some(format!(
                        "tool execution timed out after {}ms",
                        limits.timeout_ms
                    )),
                ),
            };

        let latency_ms = started.elapsed().as_millis() as i64;
        self.audit(
            store,
            call,
            ctx,
            status,
            output.clone(),
            error.clone(),
            latency_ms,
            cost_cents,
        )
        .await;

        Ok(ToolInvocation {
            call_id: call.id.clone(),
            status,
            output,
            error,
            latency_ms,
            cost_cents,
        })
    }

    /// Audit-row failure must not fail the enclosing message.
    #[allow(clippy::too_many_arguments)]
    async fn audit(
        &self,
        store: &dyn ConversationStore,
        call: &ToolCall,
        ctx: &ToolContext,
        status: ToolStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
        latency_ms: i64,
        cost_cents: i64,
    ) {
        let record = NewToolExecution {
            session_id: ctx.session_id,
            message_id: ctx.message_id,
            correlation_id: ctx.correlation_id.clone(),
            tool_name: call.name.clone(),
            tool_input: call.args.clone(),
            tool_output: output,
            status,
            error_message: error,
            latency_ms,
            cost_cents,
        };
        if let Err(err) = store.insert_tool_execution(record).await {
            warn!(
                tool = %call.name,
                session_id = %ctx.session_id,
                error = %err,
                "Failed to write tool execution audit row"
            );
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;
    use vocalbridge_core::store::{
        NewAudioArtifact, NewMessage, NewProviderCall, NewSession,
    };
    use vocalbridge_core::types::{
        AudioArtifact, Message, ProviderCall, Session, SessionStatus, ToolExecution,
    };

    /// Records audit rows; every other store method is unreachable in these
    /// tests.
    #[derive(Default)]
    struct AuditOnlyStore {
        executions: Mutex<Vec<NewToolExecution>>,
        fail_audit: bool,
    }

    #[async_trait]
    impl ConversationStore for AuditOnlyStore {
        async fn create_session(&self, _new: NewSession) -> Result<Session> {
            unimplemented!()
        }
        async fn get_session(&self, _tenant_id: TenantId, _id: SessionId) -> Result<Session> {
            unimplemented!()
        }
        async fn list_sessions(
            &self,
            _tenant_id: TenantId,
            _limit: i64,
            _offset: i64,
        ) -> Result<Vec<Session>> {
            unimplemented!()
        }
        async fn end_session(&self, _tenant_id: TenantId, _id: SessionId) -> Result<Session> {
            unimplemented!()
        }
        async fn set_session_status(
            &self,
            _id: SessionId,
            _status: SessionStatus,
        ) -> Result<()> {
            unimplemented!()
        }
        async fn next_sequence(&self, _session_id: SessionId) -> Result<i32> {
            unimplemented!()
        }
        async fn insert_message(&self, _new: NewMessage) -> Result<Message> {
            unimplemented!()
        }
        async fn list_messages(&self, _session_id: SessionId, _limit: i64) -> Result<Vec<Message>> {
            unimplemented!()
        }
        async fn count_messages(&self, _session_id: SessionId) -> Result<i64> {
            unimplemented!()
        }
        async fn find_message_by_idempotency_key(
            &self,
            _session_id: SessionId,
            _key: &str,
        ) -> Result<Option<Message>> {
            unimplemented!()
        }
        async fn find_message_by_sequence(
            &self,
            _session_id: SessionId,
            _sequence_number: i32,
        ) -> Result<Option<Message>> {
            unimplemented!()
        }
        async fn insert_provider_call(&self, _new: NewProviderCall) -> Result<ProviderCall> {
            unimplemented!()
        }
        async fn get_provider_call(&self, _id: Uuid) -> Result<ProviderCall> {
            unimplemented!()
        }
        async fn list_provider_calls(&self, _session_id: SessionId) -> Result<Vec<ProviderCall>> {
            unimplemented!()
        }
        async fn insert_tool_execution(&self, new: NewToolExecution) -> Result<ToolExecution> {
            if self.fail_audit {
                return Err(Error::Database("audit table unavailable".into()));
            }
            let execution = ToolExecution {
                id: Uuid::new_v4(),
                session_id: new.session_id,
                message_id: new.message_id,
                correlation_id: new.correlation_id.clone(),
                tool_name: new.tool_name.clone(),
                tool_input: new.tool_input.clone(),
                tool_output: new.tool_output.clone(),
                status: new.status,
                error_message: new.error_message.clone(),
                latency_ms: new.latency_ms,
                cost_cents: new.cost_cents,
                created_at: Utc::now(),
            };
            self.executions.lock().unwrap().push(new);
            Ok(execution)
        }
        async fn insert_audio_artifact(&self, _new: NewAudioArtifact) -> Result<AudioArtifact> {
            unimplemented!()
        }
        async fn get_audio_artifact(
            &self,
            _session_id: SessionId,
            _id: Uuid,
        ) -> Result<AudioArtifact> {
            unimplemented!()
        }
    }

    /// Sleeps past any reasonable budget.
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "SlowTool"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn permissions(&self) -> ToolPermissions {
            ToolPermissions {
                data_access: DataAccess::None,
                network_access: false,
                estimated_cost_cents: 0,
            }
        }
        fn limits(&self) -> ToolLimits {
            ToolLimits {
                timeout_ms: 20,
                max_payload_bytes: 1024,
            }
        }
        async fn execute(
            &self,
            _args: &serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutcome> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutcome::ok(serde_json::json!({})))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            tenant_id: TenantId::new(),
            session_id: SessionId::new(),
            message_id: None,
            correlation_id: "corr-test".into(),
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn test_successful_invocation_writes_audit_row() {
        let registry = ToolRegistry::with_builtins();
        let store = AuditOnlyStore::default();
        let enabled = vec!["InvoiceLookup".to_string()];

        let invocation = registry
            .invoke(
                &store,
                &enabled,
                &call("InvoiceLookup", serde_json::json!({"orderId": "12345"})),
                &ctx(),
            )
            .await
            .unwrap();

        assert_eq!(invocation.status, ToolStatus::Success);
        assert_eq!(invocation.output.unwrap()["status"], "SHIPPED");

        let executions = store.executions.lock().unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].tool_name, "InvoiceLookup");
        assert_eq!(executions[0].status, ToolStatus::Success);
    }

    #[tokio::test]
    async fn test_not_enabled_is_forbidden() {
        let registry = ToolRegistry::with_builtins();
        let store = AuditOnlyStore::default();

        let err = registry
            .invoke(
                &store,
                &[],
                &call("InvoiceLookup", serde_json::json!({"orderId": "12345"})),
                &ctx(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Forbidden(_)));
        // Rejections still leave an audit trail.
        assert_eq!(store.executions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_is_not_found() {
        let registry = ToolRegistry::with_builtins();
        let store = AuditOnlyStore::default();

        let err = registry
            .invoke(
                &store,
                &["NoSuchTool".to_string()],
                &call("NoSuchTool", serde_json::json!({})),
                &ctx(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_timeout_status() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        let store = AuditOnlyStore::default();

        let invocation = registry
            .invoke(
                &store,
                &["SlowTool".to_string()],
                &call("SlowTool", serde_json::json!({})),
                &ctx(),
            )
            .await
            .unwrap();

        assert_eq!(invocation.status, ToolStatus::Timeout);
        assert!(invocation.error.unwrap().contains("timed out"));
        assert_eq!(
            store.executions.lock().unwrap()[0].status,
            ToolStatus::Timeout
        );
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_invocation() {
        let registry = ToolRegistry::with_builtins();
        let store = AuditOnlyStore {
            fail_audit: true,
            ..Default::default()
        };

        let invocation = registry
            .invoke(
                &store,
                &["InvoiceLookup".to_string()],
                &call("InvoiceLookup", serde_json::json!({"orderId": "12345"})),
                &ctx(),
            )
            .await
            .unwrap();

        assert_eq!(invocation.status, ToolStatus::Success);
    }

    #[tokio::test]
    async fn test_catalog_respects_enabled_set() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.catalog(&[]).is_empty());

        let catalog = registry.catalog(&["InvoiceLookup".to_string()]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "InvoiceLookup");

        // Unregistered names are silently skipped.
        let catalog = registry.catalog(&["InvoiceLookup".to_string(), "Ghost".to_string()]);
        assert_eq!(catalog.len(), 1);
    }
}
