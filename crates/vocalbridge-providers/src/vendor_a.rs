//! Vendor A adapter
//!
//! Completion-style wire dialect: `choices[0].message` plus a `usage` block.
//! The mock reproduces the vendor's personality (50-200ms base latency, 5%
//! latency spikes of 1-3s, 10% HTTP 500) behind a configurable fault profile.

use async_trait::async_trait;
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

/// Raw wire shape of a Vendor A completion. Validation happens by
/// deserializing the raw payload into this shape before translation.
#[derive(Debug, Serialize, Deserialize)]
struct VendorACompletion {
    id: String,
    object: String,
    choices: Vec<VendorAChoice>,
    usage: VendorAUsage,
}

#[derive(Debug, Serialize, Deserialize)]
struct VendorAChoice {
    index: u32,
    message: VendorAMessage,
    finish_reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VendorAMessage {
    role: String,
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<VendorAToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VendorAToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: VendorAFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct VendorAFunction {
    name: String,
    /// JSON-encoded arguments, as the vendor sends them.
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VendorAUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

/// Mocked Vendor A connector.
pub struct VendorAAdapter {
    faults: FaultProfile,
    request_timeout: Duration,
}

impl VendorAAdapter {
    pub fn new() -> Self {
        Self::with_faults(FaultProfile::vendor_a())
    }

    pub fn with_faults(faults: FaultProfile) -> Self {
        Self {
            faults,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Build the raw wire payload the mocked vendor would return.
    fn raw_response(&self, request: &ChatRequest) -> serde_json::Value {
        let (content, tool_calls) = match mock_reply(request) {
            MockReply::Text(text) => (Some(text), vec![]),
            MockReply::CallTool(call) => (
                None,
                vec![VendorAToolCall {
                    id: call.id,
                    call_type: "function".to_string(),
                    function: VendorAFunction {
                        name: call.name,
                        arguments: call.args.to_string(),
                    },
                }],
            ),
        };
        let finish_reason = if tool_calls.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };
        let completion_tokens = estimate_tokens(content.as_deref().unwrap_or_default()).max(1);

        let mut raw = serde_json::json!({
            "id": format!("cmpl-{}", Uuid::new_v4().simple()),
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": content,
                },
                "finish_reason": finish_reason,
            }],
            "usage": {
                "prompt_tokens": estimate_request_tokens(request),
                "completion_tokens": completion_tokens,
            },
        });
        if !tool_calls.is_empty() {
            raw["choices"][0]["message"]["tool_calls"] =
                serde_json::to_value(&tool_calls).unwrap_or_default();
        }

        // Injected schema fault: drop the usage block entirely.
        if self.faults.roll(self.faults.malformed_rate)
            && let Some(obj) = raw.as_object_mut()
        {
            obj.remove("usage");
        }
        raw
    }

    /// Validate the raw payload against the declared wire shape and
    /// translate into the neutral response.
    fn translate(&self, raw: serde_json::Value, latency_ms: i64) -> Result<ChatResponse> {
        let completion: VendorACompletion =
            serde_json::from_value(raw.clone()).map_err(|e| Error::ProviderSchema {
                provider: Some(ProviderId::VendorA),
                message: format!("response failed schema validation: {}", e),
                raw,
            })?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ProviderSchema {
                provider: Some(ProviderId::VendorA),
                message: "response contained no choices".to_string(),
                raw: serde_json::Value::Null,
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let args =
                    serde_json::from_str(&tc.function.arguments).map_err(|e| Error::ProviderSchema {
                        provider: Some(ProviderId::VendorA),
                        message: format!("tool call arguments are not valid JSON: {}", e),
                        raw: serde_json::Value::String(tc.function.arguments.clone()),
                    })?;
                Ok(ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    args,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tokens_in: completion.usage.prompt_tokens,
            tokens_out: completion.usage.completion_tokens,
            latency_ms,
            tool_calls,
        })
    }
}

impl Default for VendorAAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for VendorAAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::VendorA
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let started = Instant::now();
        self.faults.simulated_latency().await;

        if self.faults.roll(self.faults.error_rate) {
            debug!(provider = "VENDOR_A", "injected upstream 500");
            return Err(Error::provider(
                ProviderId::VendorA,
                "upstream returned 500 Internal Server Error",
                Some(500),
            ));
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

    fn request(content: &str, with_tools: bool) -> ChatRequest {
        ChatRequest {
            system_prompt: "You are a support agent.".into(),
            messages: vec![ChatMessage::user(content)],
            temperature: 0.7,
            max_tokens: 256,
            tools: if with_tools {
                vec![ToolSpec {
                    name: "InvoiceLookup".into(),
                    description: "Look up an order".into(),
                    parameters: serde_json::json!({"type": "object"}),
                }]
            } else {
                vec![]
            },
        }
    }

    #[tokio::test]
    async fn test_plain_reply() {
        let adapter = VendorAAdapter::with_faults(FaultProfile::none());
        let response = adapter.send(&request("hello", false)).await.unwrap();
        assert!(!response.content.is_empty());
        assert!(response.tool_calls.is_empty());
        assert!(response.tokens_in > 0);
        assert!(response.tokens_out > 0);
    }

    #[tokio::test]
    async fn test_order_id_becomes_tool_call() {
        let adapter = VendorAAdapter::with_faults(FaultProfile::none());
        let response = adapter
            .send(&request("status of order #12345", true))
            .await
            .unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "InvoiceLookup");
        assert_eq!(response.tool_calls[0].args["orderId"], "12345");
    }

    #[tokio::test]
    async fn test_forced_error_is_retryable_500() {
        let adapter = VendorAAdapter::with_faults(FaultProfile::always_failing());
        let err = adapter.send(&request("hello", false)).await.unwrap_err();
        assert!(err.is_retryable());
        match err {
            Error::Provider { status, .. } => assert_eq!(status, Some(500)),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_schema_error() {
        let faults = FaultProfile {
            malformed_rate: 1.0,
            ..FaultProfile::none()
        };
        let adapter = VendorAAdapter::with_faults(faults);
        let err = adapter.send(&request("hello", false)).await.unwrap_err();
        assert!(!err.is_retryable());
        match err {
            Error::ProviderSchema { raw, .. } => {
                // The raw payload is carried for diagnosis.
                assert!(raw.get("choices").is_some());
                assert!(raw.get("usage").is_none());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_translate_rejects_garbage_arguments() {
        let adapter = VendorAAdapter::with_faults(FaultProfile::none());
        let raw = serde_json::json!({
            "id": "cmpl-x",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "InvoiceLookup", "arguments": "{not json"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 1},
        });
        let err = adapter.translate(raw, 5).unwrap_err();
        assert!(matches!(err, Error::ProviderSchema { .. }));
    }
}
