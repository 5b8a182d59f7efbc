//! Vendor B adapter
//!
//! Content-block wire dialect: a list of typed blocks plus `input_tokens` /
//! `output_tokens` usage. The mock reproduces the vendor's personality
//! (30-100ms base latency, 5% rate-limited with a suggested retry delay).

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    chat::{ChatRequest, ChatResponse, ToolCall},
    provider::ChatProvider,
    types::ProviderId,
};

use crate::mock::{FaultProfile, MockReply, estimate_request_tokens, estimate_tokens, mock_reply};

#[derive(Debug, Serialize, Deserialize)]
struct VendorBMessage {
    id: String,
    #[serde(rename = "type")]
    message_type: String,
    content: Vec<VendorBBlock>,
    stop_reason: String,
    usage: VendorBUsage,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum VendorBBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct VendorBUsage {
    input_tokens: i64,
    output_tokens: i64,
}

/// Mocked Vendor B connector.
pub struct VendorBAdapter {
    faults: FaultProfile,
    request_timeout: Duration,
}

impl VendorBAdapter {
    pub fn new() -> Self {
        Self::with_faults(FaultProfile::vendor_b())
    }

    pub fn with_faults(faults: FaultProfile) -> Self {
        Self {
            faults,
            request_timeout: Duration::from_secs(15),
        }
    }

    fn raw_response(&self, request: &ChatRequest) -> serde_json::Value {
        let (blocks, stop_reason) = match mock_reply(request) {
            MockReply::Text(text) => (
                vec![VendorBBlock::Text { text }],
                "end_turn",
            ),
            MockReply::CallTool(call) => (
                vec![VendorBBlock::ToolUse {
                    id: call.id,
                    name: call.name,
                    input: call.args,
                }],
                "tool_use",
            ),
        };
        let output_tokens = blocks
            .iter()
            .map(|b| match b {
                VendorBBlock::Text { text } => estimate_tokens(text),
                VendorBBlock::ToolUse { input, .. } => estimate_tokens(&input.to_string()),
            })
            .sum::<i64>()
            .max(1);

        let mut raw = serde_json::json!({
            "id": format!("msg_{}", Uuid::new_v4().simple()),
            "type": "message",
            "content": serde_json::to_value(&blocks).unwrap_or_default(),
            "stop_reason": stop_reason,
            "usage": {
                "input_tokens": estimate_request_tokens(request),
                "output_tokens": output_tokens,
            },
        });

        // Injected schema fault: usage block replaced with a bare number.
        if self.faults.roll(self.faults.malformed_rate) {
            raw["usage"] = serde_json::json!(42);
        }
        raw
    }

    fn translate(&self, raw: serde_json::Value, latency_ms: i64) -> Result<ChatResponse> {
        let message: VendorBMessage =
            serde_json::from_value(raw.clone()).map_err(|e| Error::ProviderSchema {
                provider: Some(ProviderId::VendorB),
                message: format!("response failed schema validation: {}", e),
                raw,
            })?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in message.content {
            match block {
                VendorBBlock::Text { text } => content.push_str(&text),
                VendorBBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    args: input,
                }),
            }
        }

        Ok(ChatResponse {
            content,
            tokens_in: message.usage.input_tokens,
            tokens_out: message.usage.output_tokens,
            latency_ms,
            tool_calls,
        })
    }
}

impl Default for VendorBAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for VendorBAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::VendorB
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let started = Instant::now();
        self.faults.simulated_latency().await;

        if self.faults.roll(self.faults.rate_limit_rate) {
            let retry_after_ms = rand::rng().random_range(1000..=3000);
            debug!(
                provider = "VENDOR_B",
                retry_after_ms, "injected rate limit"
            );
            return Err(Error::RateLimited {
                retry_after_ms: Some(retry_after_ms),
            });
        }

        let raw = self.raw_response(request);
        let latency_ms = started.elapsed().as_millis() as i64;
        self.translate(raw, latency_ms)
    }

    fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vocalbridge_core::chat::{ChatMessage, ToolSpec};

    fn request(content: &str) -> ChatRequest {
        ChatRequest {
            system_prompt: "You are a support agent.".into(),
            messages: vec![ChatMessage::user(content)],
            temperature: 0.7,
            max_tokens: 256,
            tools: vec![ToolSpec {
                name: "InvoiceLookup".into(),
                description: "Look up an order".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
        }
    }

    #[tokio::test]
    async fn test_plain_reply() {
        let adapter = VendorBAdapter::with_faults(FaultProfile::none());
        let response = adapter.send(&request("hi there")).await.unwrap();
        assert!(!response.content.is_empty());
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_tool_use_block_translates_to_tool_call() {
        let adapter = VendorBAdapter::with_faults(FaultProfile::none());
        let response = adapter
            .send(&request("invoice 445566 please"))
            .await
            .unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].args["orderId"], "445566");
    }

    #[tokio::test]
    async fn test_forced_rate_limit_carries_retry_hint() {
        let faults = FaultProfile {
            rate_limit_rate: 1.0,
            ..FaultProfile::none()
        };
        let adapter = VendorBAdapter::with_faults(faults);
        let err = adapter.send(&request("hello")).await.unwrap_err();
        assert!(err.is_retryable());
        match err {
            Error::RateLimited { retry_after_ms } => {
                let ms = retry_after_ms.unwrap();
                assert!((1000..=3000).contains(&ms));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_usage_is_schema_error() {
        let faults = FaultProfile {
            malformed_rate: 1.0,
            ..FaultProfile::none()
        };
        let adapter = VendorBAdapter::with_faults(faults);
        let err = adapter.send(&request("hello")).await.unwrap_err();
        assert!(matches!(err, Error::ProviderSchema { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_vendor_b_timeout_budget() {
        let adapter = VendorBAdapter::with_faults(FaultProfile::none());
        assert_eq!(adapter.request_timeout(), Duration::from_secs(15));
    }
}
