//! Anthropic messages wire format.
//!
//! The system prompt travels in its own field and `tool` messages are folded
//! into user turns. Tool calling is not negotiated with this vendor, so
//! responses never carry tool calls.

use serde::{Deserialize, Serialize};

use quarry_contracts::message::{ChatRequest, ChatResponse, Role};

pub const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
pub(crate) struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    system: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

pub(crate) fn build_request<'a>(model: &'a str, request: &'a ChatRequest) -> WireRequest<'a> {
    let messages = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        // The vendor rejects empty assistant turns; tool calls are not sent here.
        .filter(|m| !(m.role == Role::Assistant && m.content.trim().is_empty()))
        .map(|m| match m.role {
            Role::Tool => WireMessage {
                role: "user",
                content: format!("Tool result: {}", m.content),
            },
            Role::Assistant => WireMessage {
                role: "assistant",
                content: m.content.clone(),
            },
            _ => WireMessage {
                role: "user",
                content: m.content.clone(),
            },
        })
        .collect();

    WireRequest {
        model,
        messages,
        system: request.system_prompt().unwrap_or(""),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResponse {
    #[serde(default)]
    content: Vec<WireBlock>,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(default)]
    text: Option<String>,
}

pub(crate) fn parse_response(response: WireResponse) -> ChatResponse {
    let text = response
        .content
        .into_iter()
        .find_map(|block| block.text)
        .unwrap_or_default();
    ChatResponse::text(text)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use quarry_contracts::{
        message::{ChatMessage, ChatRequest},
        tool::ToolCall,
    };

    use super::{build_request, parse_response, WireResponse};

    #[test]
    fn test_system_is_lifted_and_tool_results_become_user_turns() {
        let call = ToolCall::new("c1", "query_collection", "{}");
        let request = ChatRequest::new(vec![
            ChatMessage::system("You are a finance analyst."),
            ChatMessage::user("spend?"),
            ChatMessage::assistant("checking"),
            ChatMessage::tool_result(&call, "[1,2]"),
        ]);

        let wire = serde_json::to_value(build_request("claude-3-5-sonnet-latest", &request)).unwrap();
        assert_eq!(wire["system"], "You are a finance analyst.");
        assert_eq!(wire["max_tokens"], 1024);
        assert_eq!(
            wire["messages"],
            json!([
                { "role": "user", "content": "spend?" },
                { "role": "assistant", "content": "checking" },
                { "role": "user", "content": "Tool result: [1,2]" }
            ])
        );
    }

    #[test]
    fn test_empty_assistant_turn_with_calls_is_dropped() {
        let call = ToolCall::new("plan_step_1", "query_collection", "{}");
        let request = ChatRequest::new(vec![
            ChatMessage::user("software spend by vendor?"),
            ChatMessage::assistant_with_calls(String::new(), vec![call.clone()]),
            ChatMessage::tool_result(&call, "[]"),
        ]);

        let wire = serde_json::to_value(build_request("claude-3-5-sonnet-latest", &request)).unwrap();
        let messages = wire["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m["role"] == "user"));
    }

    #[test]
    fn test_response_never_carries_tool_calls() {
        let raw: WireResponse =
            serde_json::from_value(json!({ "content": [{ "type": "text", "text": "Hello" }] })).unwrap();
        let response = parse_response(raw);
        assert_eq!(response.content, "Hello");
        assert!(response.tool_calls.is_none());
    }
}
