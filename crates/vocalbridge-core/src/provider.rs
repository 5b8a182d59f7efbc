//! Provider adapter trait

use crate::{
    Result,
    chat::{ChatRequest, ChatResponse},
    types::ProviderId,
};

/// One upstream AI vendor, behind the neutral request/response shapes.
///
/// Adapters translate, validate the raw vendor payload, and classify
/// failures; they never retry internally. Retry, backoff, and fallback policy
/// live entirely in the orchestrator.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// The vendor this adapter speaks to.
    fn id(&self) -> ProviderId;

    /// Send a single request. Fails with one of the provider error kinds
    /// (timeout, rate-limited, schema, provider), each carrying a retryable
    /// hint.
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Hard bound for one outbound call. The orchestrator cancels the call
    /// and records a timeout once this elapses.
    fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
}
