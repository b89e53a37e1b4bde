//! Google Gemini `generateContent` wire format.
//!
//! Roles become `user`/`model`, the system prompt becomes a
//! `systemInstruction`, and responses never carry tool calls.

use serde::{Deserialize, Serialize};

use quarry_contracts::message::{ChatRequest, ChatResponse, Role};

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireRequest<'a> {
    contents: Vec<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireInstruction<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct WireContent<'a> {
    role: &'static str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Debug, Serialize)]
struct WireInstruction<'a> {
    parts: Vec<WirePart<'a>>,
}

#[derive(Debug, Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

pub(crate) fn build_request(request: &ChatRequest) -> WireRequest<'_> {
    let contents = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .filter(|m| !(m.role == Role::Assistant && m.content.trim().is_empty()))
        .map(|m| WireContent {
            role: if m.role == Role::Assistant { "model" } else { "user" },
            parts: vec![WirePart { text: &m.content }],
        })
        .collect();

    WireRequest {
        contents,
        system_instruction: request.system_prompt().map(|text| WireInstruction {
            parts: vec![WirePart { text }],
        }),
        generation_config: GenerationConfig {
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_output_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
        },
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

pub(crate) fn parse_response(response: WireResponse) -> ChatResponse {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
        .unwrap_or_default();
    ChatResponse::text(text)
}
