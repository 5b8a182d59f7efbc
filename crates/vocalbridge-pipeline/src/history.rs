//! Conversation history assembly
//!
//! Pure translation from persisted transcript rows to the neutral chat
//! shapes. Tool calls ride on the ASSISTANT message that emitted them; tool
//! results ride on the TOOL message that carries them, encoded in the
//! content field.

use serde::{Deserialize, Serialize};

use vocalbridge_core::chat::{ChatMessage, ChatRole, ToolResult};
use vocalbridge_core::types::{Message, MessageRole};

/// How many recent transcript rows feed one provider request.
pub const MAX_HISTORY_MESSAGES: i64 = 50;

/// The JSON carried in a TOOL message's content field. The TOOL row has no
/// tool-result column; this encoding is the storage format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedToolResult {
    pub id: String,
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EncodedToolResult {
    pub fn encode(&self) -> String {
        // Serializing a struct of plain fields cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Translate transcript rows (ascending sequence) into neutral messages.
pub fn to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| match message.role {
            MessageRole::User => ChatMessage {
                role: ChatRole::User,
                content: message.content.clone(),
                tool_calls: vec![],
                tool_results: vec![],
            },
            MessageRole::System => ChatMessage {
                role: ChatRole::System,
                content: message.content.clone(),
                tool_calls: vec![],
                tool_results: vec![],
            },
            MessageRole::Assistant => ChatMessage {
                role: ChatRole::Assistant,
                content: message.content.clone(),
                tool_calls: message.tool_calls.clone(),
                tool_results: vec![],
            },
            MessageRole::Tool => {
                let tool_results = serde_json::from_str::<EncodedToolResult>(&message.content)
                    .map(|encoded| {
                        vec![ToolResult {
                            call_id: encoded.id,
                            output: encoded.result,
                            error: encoded.error,
                        }]
                    })
                    .unwrap_or_default();
                ChatMessage {
                    role: ChatRole::Tool,
                    content: String::new(),
                    tool_calls: vec![],
                    tool_results,
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vocalbridge_core::chat::ToolCall;
    use vocalbridge_core::types::SessionId;

    fn message(seq: i32, role: MessageRole, content: &str, tool_calls: Vec<ToolCall>) -> Message {
        Message {
            id: Uuid::new_v4(),
            session_id: SessionId::new(),
            sequence_number: seq,
            idempotency_key: None,
            role,
            content: content.to_string(),
            tool_calls,
            provider_call_id: None,
            audio_artifact_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_roles_translate() {
        let rows = vec![
            message(1, MessageRole::User, "hi", vec![]),
            message(2, MessageRole::Assistant, "hello", vec![]),
            message(3, MessageRole::System, "note", vec![]),
        ];
        let chat = to_chat_messages(&rows);
        assert_eq!(chat.len(), 3);
        assert_eq!(chat[0].role, ChatRole::User);
        assert_eq!(chat[1].role, ChatRole::Assistant);
        assert_eq!(chat[2].role, ChatRole::System);
    }

    #[test]
    fn test_tool_calls_ride_the_assistant_message() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "InvoiceLookup".into(),
            args: serde_json::json!({"orderId": "12345"}),
        };
        let rows = vec![message(2, MessageRole::Assistant, "", vec![call.clone()])];
        let chat = to_chat_messages(&rows);
        assert_eq!(chat[0].tool_calls, vec![call]);
    }

    #[test]
    fn test_tool_result_decodes_from_content() {
        let encoded = EncodedToolResult {
            id: "call_1".into(),
            result: serde_json::json!({"status": "SHIPPED"}),
            error: None,
        };
        let rows = vec![message(3, MessageRole::Tool, &encoded.encode(), vec![])];
        let chat = to_chat_messages(&rows);
        assert_eq!(chat[0].tool_results.len(), 1);
        assert_eq!(chat[0].tool_results[0].call_id, "call_1");
        assert_eq!(chat[0].tool_results[0].output["status"], "SHIPPED");
    }

    #[test]
    fn test_error_result_round_trips() {
        let encoded = EncodedToolResult {
            id: "call_2".into(),
            result: serde_json::Value::Null,
            error: Some("Order not found".into()),
        };
        let rows = vec![message(3, MessageRole::Tool, &encoded.encode(), vec![])];
        let chat = to_chat_messages(&rows);
        assert_eq!(
            chat[0].tool_results[0].error.as_deref(),
            Some("Order not found")
        );
    }

    #[test]
    fn test_malformed_tool_content_yields_no_results() {
        let rows = vec![message(3, MessageRole::Tool, "not json", vec![])];
        let chat = to_chat_messages(&rows);
        assert!(chat[0].tool_results.is_empty());
    }
}
