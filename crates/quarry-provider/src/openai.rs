//! OpenAI chat-completions wire format.
//!
//! The uniform request maps one-to-one onto this format, so translation only
//! reshapes tool calls into OpenAI's nested `function` objects. Custom
//! OpenAI-compatible endpoints use the same module.

use serde::{Deserialize, Serialize};

use quarry_contracts::{
    error::{QuarryError, QuarryResult},
    message::{ChatMessage, ChatRequest, ChatResponse, ToolChoice},
    tool::{ToolCall, ToolDefinition},
};

#[derive(Debug, Serialize)]
pub(crate) struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            kind: function_kind(),
            function: WireFunction {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role.as_str(),
            content: &message.content,
            tool_calls: message.tool_calls.iter().map(WireToolCall::from).collect(),
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

pub(crate) fn build_request<'a>(model: &'a str, request: &'a ChatRequest) -> WireRequest<'a> {
    WireRequest {
        model,
        messages: request.messages.iter().map(WireMessage::from).collect(),
        tools: request.tools.as_deref(),
        tool_choice: request.tool_choice.as_ref(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        user: request.user.as_deref(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireReply,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

pub(crate) fn parse_response(response: WireResponse) -> QuarryResult<ChatResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| QuarryError::ProviderResponse {
            reason: "chat completion returned no choices".to_string(),
        })?;

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: choice.message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|c| ToolCall::new(c.id, c.function.name, c.function.arguments))
                .collect()
        }),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use quarry_contracts::{
        message::{ChatMessage, ChatRequest, ToolChoice},
        tool::{tool_definitions, ToolCall},
    };

    use super::{build_request, parse_response, WireResponse};

    #[test]
    fn test_request_carries_uniform_fields() {
        let call = ToolCall::new("call_1", "query_collection", r#"{"collection":"finance_transactions"}"#);
        let mut request = ChatRequest::new(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("spend?"),
            ChatMessage::assistant_with_calls("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "[]"),
        ]);
        request.tools = Some(tool_definitions(None));
        request.tool_choice = Some(ToolChoice::Auto);
        request.temperature = Some(0.3);
        request.user = Some("user-1".into());

        let wire = serde_json::to_value(build_request("gpt-4o", &request)).unwrap();
        assert_eq!(wire["model"], "gpt-4o");
        assert_eq!(wire["tool_choice"], "auto");
        assert_eq!(wire["user"], "user-1");
        assert_eq!(wire["tools"].as_array().unwrap().len(), 3);
        assert_eq!(wire["messages"][0]["role"], "system");
        assert_eq!(
            wire["messages"][2]["tool_calls"][0],
            json!({
                "id": "call_1",
                "type": "function",
                "function": { "name": "query_collection", "arguments": "{\"collection\":\"finance_transactions\"}" }
            })
        );
        assert_eq!(wire["messages"][3]["tool_call_id"], "call_1");
        assert!(wire.get("max_tokens").is_none());
    }

    #[test]
    fn test_response_maps_tool_calls() {
        let raw: WireResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "analyze_data", "arguments": "{}" }
                    }]
                }
            }]
        }))
        .unwrap();
        let response = parse_response(raw).unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.requested_calls()[0].name, "analyze_data");
    }

    #[test]
    fn test_response_without_choices_is_an_error() {
        let raw: WireResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(parse_response(raw).is_err());
    }
}
