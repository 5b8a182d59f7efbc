//! Shared machinery for the mocked vendor adapters
//!
//! Both vendors are simulated: deterministic reply generation plus a fault
//! profile controlling latency and injected failures. Tests run with
//! `FaultProfile::none()` so behavior is fully deterministic; the realistic
//! profiles reproduce each vendor's published personality.

use rand::Rng;
use std::ops::Range;
use std::time::Duration;
use uuid::Uuid;

use vocalbridge_core::chat::{ChatRequest, ChatRole, ToolCall};

/// Probabilities and latency simulation knobs for a mocked vendor.
#[derive(Debug, Clone)]
pub struct FaultProfile {
    /// Simulate wall-clock latency with real sleeps.
    pub simulate_latency: bool,
    /// Base latency range in milliseconds.
    pub base_latency_ms: Range<u64>,
    /// Chance of adding a latency spike, and its range.
    pub spike_rate: f64,
    pub spike_latency_ms: Range<u64>,
    /// Chance of a 5xx provider error.
    pub error_rate: f64,
    /// Chance of a rate-limit rejection.
    pub rate_limit_rate: f64,
    /// Chance of emitting a wire payload that fails schema validation.
    pub malformed_rate: f64,
}

impl FaultProfile {
    /// No faults, no sleeps. The default for tests.
    pub fn none() -> Self {
        Self {
            simulate_latency: false,
            base_latency_ms: 0..1,
            spike_rate: 0.0,
            spike_latency_ms: 0..1,
            error_rate: 0.0,
            rate_limit_rate: 0.0,
            malformed_rate: 0.0,
        }
    }

    /// Vendor A personality: 50-200ms base, 5% 1-3s spikes, 10% HTTP 500.
    pub fn vendor_a() -> Self {
        Self {
            simulate_latency: true,
            base_latency_ms: 50..200,
            spike_rate: 0.05,
            spike_latency_ms: 1000..3000,
            error_rate: 0.10,
            rate_limit_rate: 0.0,
            malformed_rate: 0.0,
        }
    }

    /// Vendor B personality: 30-100ms base, 5% rate-limited.
    pub fn vendor_b() -> Self {
        Self {
            simulate_latency: true,
            base_latency_ms: 30..100,
            spike_rate: 0.0,
            spike_latency_ms: 0..1,
            error_rate: 0.0,
            rate_limit_rate: 0.05,
            malformed_rate: 0.0,
        }
    }

    /// Every call fails with a 5xx. For forcing fallback in tests.
    pub fn always_failing() -> Self {
        Self {
            error_rate: 1.0,
            ..Self::none()
        }
    }

    /// Sleep out the simulated latency and return the milliseconds drawn.
    pub async fn simulated_latency(&self) -> u64 {
        let mut millis = {
            let mut rng = rand::rng();
            let mut drawn = if self.base_latency_ms.is_empty() {
                0
            } else {
                rng.random_range(self.base_latency_ms.clone())
            };
            if self.spike_rate > 0.0 && rng.random_bool(self.spike_rate) {
                drawn += rng.random_range(self.spike_latency_ms.clone());
            }
            drawn
        };
        if !self.simulate_latency {
            millis = 0;
        }
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        millis
    }

    pub fn roll(&self, rate: f64) -> bool {
        rate > 0.0 && rand::rng().random_bool(rate.min(1.0))
    }
}

/// Rough token estimate for mocked usage accounting: one token per four
/// characters, minimum one for non-empty text.
pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4) as i64
}

/// Total input-token estimate for a request.
pub fn estimate_request_tokens(request: &ChatRequest) -> i64 {
    let mut total = estimate_tokens(&request.system_prompt);
    for message in &request.messages {
        total += estimate_tokens(&message.content);
        for result in &message.tool_results {
            total += estimate_tokens(&result.output.to_string());
        }
    }
    total
}

/// Extract an order-id-looking token (a run of 3 to 12 digits, optionally
/// prefixed with `#`) from user text.
pub fn find_order_id(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let run = &text[start..i];
            if (3..=12).contains(&run.len()) {
                return Some(run.to_string());
            }
        } else {
            i += 1;
        }
    }
    None
}

/// What the mocked model decides to do with a request.
pub enum MockReply {
    /// Plain assistant text.
    Text(String),
    /// Invoke a tool instead of answering.
    CallTool(ToolCall),
}

/// Deterministic reply generation shared by both vendors.
///
/// A user message containing a numeric order id becomes an InvoiceLookup
/// call when that tool is in the request catalog. A follow-up turn (empty
/// final user message after tool results) becomes a natural-language answer
/// over the most recent tool results.
pub fn mock_reply(request: &ChatRequest) -> MockReply {
    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User);

    if let Some(user) = last_user
        && user.content.trim().is_empty()
    {
        // Tool-result turn: summarize the latest results.
        let results: Vec<String> = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::Tool && !m.tool_results.is_empty())
            .map(|m| {
                m.tool_results
                    .iter()
                    .map(|r| match &r.error {
                        Some(err) => format!("the lookup failed: {}", err),
                        None => describe_tool_output(&r.output),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let answer = if results.is_empty() {
            "I wasn't able to retrieve that information.".to_string()
        } else {
            format!("Here's what I found: {}", results.join("; "))
        };
        return MockReply::Text(answer);
    }

    if let Some(user) = last_user
        && let Some(order_id) = find_order_id(&user.content)
        && request.tools.iter().any(|t| t.name == "InvoiceLookup")
    {
        return MockReply::CallTool(ToolCall {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: "InvoiceLookup".to_string(),
            args: serde_json::json!({ "orderId": order_id }),
        });
    }

    let prompt = last_user.map(|m| m.content.as_str()).unwrap_or_default();
    MockReply::Text(format!(
        "Thanks for reaching out. Regarding \"{}\": I'm happy to help with that.",
        prompt.trim()
    ))
}

fn describe_tool_output(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{} is {}", k, render_scalar(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => render_scalar(other),
    }
}

fn render_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vocalbridge_core::chat::{ChatMessage, ToolResult, ToolSpec};

    fn request_with(messages: Vec<ChatMessage>, tools: Vec<ToolSpec>) -> ChatRequest {
        ChatRequest {
            system_prompt: "You are a support agent.".into(),
            messages,
            temperature: 0.7,
            max_tokens: 256,
            tools,
        }
    }

    fn invoice_tool() -> ToolSpec {
        ToolSpec {
            name: "InvoiceLookup".into(),
            description: "Look up an order".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn test_find_order_id() {
        assert_eq!(find_order_id("status of order #12345"), Some("12345".into()));
        assert_eq!(find_order_id("order 987654321 please"), Some("987654321".into()));
        assert_eq!(find_order_id("no digits here"), None);
        // Too short and too long runs are skipped.
        assert_eq!(find_order_id("item 12"), None);
        assert_eq!(find_order_id("1234567890123 is too long"), None);
    }

    #[test]
    fn test_order_id_triggers_tool_call() {
        let request = request_with(
            vec![ChatMessage::user("where is order #12345?")],
            vec![invoice_tool()],
        );
        match mock_reply(&request) {
            MockReply::CallTool(call) => {
                assert_eq!(call.name, "InvoiceLookup");
                assert_eq!(call.args["orderId"], "12345");
                assert!(call.id.starts_with("call_"));
            }
            MockReply::Text(text) => panic!("expected tool call, got text: {}", text),
        }
    }

    #[test]
    fn test_no_tool_catalog_means_plain_answer() {
        let request = request_with(vec![ChatMessage::user("where is order #12345?")], vec![]);
        assert!(matches!(mock_reply(&request), MockReply::Text(_)));
    }

    #[test]
    fn test_follow_up_turn_answers_from_tool_results() {
        let tool_msg = ChatMessage {
            role: ChatRole::Tool,
            content: String::new(),
            tool_calls: vec![],
            tool_results: vec![ToolResult {
                call_id: "call_1".into(),
                output: serde_json::json!({"status": "SHIPPED", "tracking": "TRK-9"}),
                error: None,
            }],
        };

        let request = request_with(
            vec![
                ChatMessage::user("where is order #12345?"),
                tool_msg,
                ChatMessage::user(""),
            ],
            vec![invoice_tool()],
        );
        match mock_reply(&request) {
            MockReply::Text(text) => {
                assert!(text.contains("SHIPPED"), "answer was: {}", text);
            }
            MockReply::CallTool(_) => panic!("expected text on follow-up turn"),
        }
    }

    #[test]
    fn test_token_estimation() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);

        let request = request_with(vec![ChatMessage::user("hello there")], vec![]);
        assert!(estimate_request_tokens(&request) > 0);
    }
}
