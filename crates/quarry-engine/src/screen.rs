//! Smart Engage: decides whether a message needs the full model at all.
//!
//! The cascade runs cheapest first and stops at the first stage that can
//! answer:
//!
//!   Cached reply → Greeting → Off-topic → Pre-screen classifier → Full model
//!
//! The first three stages are pure functions and never touch the network.
//! The classifier is one small model call; when it fails for any reason the
//! message is escalated (fail open) and the failure is logged at `warn`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quarry_contracts::{
    agent::ProviderKind,
    collection::CollectionSet,
    message::{ChatMessage, ChatRequest},
};
use quarry_provider::ProviderClient;

pub const GREETING_RESPONSE: &str = "Hello! How can I help you analyze your data today?";
pub const THANKS_RESPONSE: &str = "You're welcome! Let me know if you need anything else.";
pub const OFF_TOPIC_RESPONSE: &str =
    "I'm designed to help you analyze your enterprise data. Could you ask a question related to your data collections?";
pub const PRESCREEN_FALLBACK_RESPONSE: &str =
    "I can help you with data analysis. What would you like to know?";

pub const REASON_CACHED: &str = "Cached response for common greeting";
pub const REASON_GREETING: &str = "Simple greeting - using template response";
pub const REASON_OFF_TOPIC: &str = "Off-topic message - using template response";
pub const REASON_PRESCREENED: &str = "Pre-screened as simple query";
pub const REASON_PRESCREEN_FAILED: &str = "Pre-screening failed, processing normally";
pub const REASON_FULL_MODEL: &str = "Message requires full AI processing";

const GREETING_TOKENS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "ok", "okay", "yes", "no", "bye", "goodbye",
];

const DOMAIN_KEYWORDS: &[&str] = &[
    "data",
    "query",
    "show",
    "get",
    "find",
    "analyze",
    "report",
    "summary",
    "finance",
    "sales",
    "hr",
    "employee",
    "deal",
    "transaction",
    "revenue",
    "expense",
    "spend",
    "burn rate",
    "cost",
    "budget",
    "cash",
    "total",
    "average",
    "trend",
];

/// Messages at or below this length are never judged off-topic.
const OFF_TOPIC_MIN_LEN: usize = 20;

const PRESCREEN_TEMPERATURE: f32 = 0.1;
const PRESCREEN_MAX_TOKENS: u32 = 200;
const DEFAULT_CONFIDENCE: f64 = 0.5;

// ── Named predicates ─────────────────────────────────────────────────────────

/// Exact-match canned reply for the most common openers and thank-yous.
pub fn cached_response(message: &str) -> Option<&'static str> {
    match message.trim().to_lowercase().as_str() {
        "hi" | "hello" => Some(GREETING_RESPONSE),
        "thanks" | "thank you" => Some(THANKS_RESPONSE),
        _ => None,
    }
}

/// True if the message is, or starts with, a greeting or acknowledgement.
pub fn is_simple_greeting(message: &str) -> bool {
    let lower = message.trim().to_lowercase();
    GREETING_TOKENS.iter().any(|greeting| {
        lower == *greeting
            || lower
                .strip_prefix(greeting)
                .is_some_and(|rest| rest.starts_with(' '))
    })
}

/// True if a longer message mentions none of the agent's collection-name
/// tokens and none of the domain keywords.
pub fn is_off_topic(message: &str, collections: &CollectionSet) -> bool {
    if message.chars().count() <= OFF_TOPIC_MIN_LEN {
        return false;
    }
    let lower = message.to_lowercase();
    let mentions_collection = collections
        .all()
        .flat_map(|c| c.split('_'))
        .filter(|token| !token.is_empty())
        .any(|token| lower.contains(&token.to_lowercase()));
    let mentions_domain = DOMAIN_KEYWORDS.iter().any(|k| lower.contains(k));
    !mentions_collection && !mentions_domain
}

// ── Cascade ──────────────────────────────────────────────────────────────────

/// The outcome of screening one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Screening {
    pub use_full_model: bool,
    /// The reply to send when the full model is skipped.
    pub response: Option<String>,
    pub reason: String,
    /// Classifier calls made while screening, zero or one.
    pub model_calls: u32,
}

impl Screening {
    fn answered(response: &str, reason: &str, model_calls: u32) -> Self {
        Self {
            use_full_model: false,
            response: Some(response.to_string()),
            reason: reason.to_string(),
            model_calls,
        }
    }

    fn escalate(reason: &str, model_calls: u32) -> Self {
        Self {
            use_full_model: true,
            response: None,
            reason: reason.to_string(),
            model_calls,
        }
    }
}

/// The lightweight classifier stage.
pub struct PreScreen<'a> {
    pub client: &'a dyn ProviderClient,
    pub provider: ProviderKind,
    pub model: &'a str,
    pub api_key: Option<&'a str>,
    pub confidence_threshold: f64,
}

/// Run the cascade over `message`.
///
/// `prescreen` is `None` when the agent has the classifier switched off.
pub async fn smart_engage(
    message: &str,
    collections: &CollectionSet,
    history: &[ChatMessage],
    prescreen: Option<&PreScreen<'_>>,
) -> Screening {
    if let Some(reply) = cached_response(message) {
        return Screening::answered(reply, REASON_CACHED, 0);
    }
    if is_simple_greeting(message) {
        return Screening::answered(GREETING_RESPONSE, REASON_GREETING, 0);
    }
    if is_off_topic(message, collections) {
        return Screening::answered(OFF_TOPIC_RESPONSE, REASON_OFF_TOPIC, 0);
    }

    let Some(stage) = prescreen else {
        return Screening::escalate(REASON_FULL_MODEL, 0);
    };

    let verdict = classify(stage, message, collections, !history.is_empty()).await;
    debug!(
        should_process = verdict.should_process,
        confidence = verdict.confidence,
        "pre-screen verdict"
    );
    if !verdict.should_process && verdict.confidence > stage.confidence_threshold {
        let response = verdict
            .suggested_response
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| PRESCREEN_FALLBACK_RESPONSE.to_string());
        let reason = verdict
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| REASON_PRESCREENED.to_string());
        return Screening {
            use_full_model: false,
            response: Some(response),
            reason,
            model_calls: 1,
        };
    }
    Screening::escalate(REASON_FULL_MODEL, 1)
}

// ── Classifier ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct Verdict {
    should_process: bool,
    confidence: f64,
    reason: Option<String>,
    suggested_response: Option<String>,
}

impl Verdict {
    fn fail_open() -> Self {
        Self {
            should_process: true,
            confidence: DEFAULT_CONFIDENCE,
            reason: Some(REASON_PRESCREEN_FAILED.to_string()),
            suggested_response: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVerdict {
    #[serde(default)]
    should_process: Option<bool>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    suggested_response: Option<String>,
}

fn screening_prompt(message: &str, collections: &CollectionSet, has_history: bool) -> String {
    let names: Vec<&str> = collections.all().collect();
    format!(
        "You are a message pre-screener. Analyze if this message needs full AI processing or can be handled simply.\n\
         \n\
         User message: \"{message}\"\n\
         \n\
         Available data collections: {collections}\n\
         \n\
         Previous conversation context: {context}\n\
         \n\
         Determine:\n\
         1. Is this a greeting/small talk? (e.g., \"hi\", \"thanks\", \"ok\")\n\
         2. Is this off-topic or not related to the available data?\n\
         3. Is this a simple question that can be answered with a template response?\n\
         4. Does this require complex reasoning, data analysis, or tool usage?\n\
         \n\
         Respond in JSON format:\n\
         {{\n  \"shouldProcess\": true/false,\n  \"confidence\": 0.0-1.0,\n  \"reason\": \"brief explanation\",\n  \"suggestedResponse\": \"if shouldProcess is false, provide a simple response\"\n}}",
        message = message,
        collections = names.join(", "),
        context = if has_history { "Yes" } else { "No" },
    )
}

async fn classify(stage: &PreScreen<'_>, message: &str, collections: &CollectionSet, has_history: bool) -> Verdict {
    let mut request = ChatRequest::new(vec![ChatMessage::system(screening_prompt(
        message,
        collections,
        has_history,
    ))]);
    request.temperature = Some(PRESCREEN_TEMPERATURE);
    request.max_tokens = Some(PRESCREEN_MAX_TOKENS);

    let response = match stage
        .client
        .call(stage.provider, stage.model, &request, stage.api_key)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, model = %stage.model, "pre-screen call failed, escalating");
            return Verdict::fail_open();
        }
    };

    match parse_verdict(&response.content) {
        Some(verdict) => verdict,
        None => {
            warn!(model = %stage.model, "pre-screen reply was not valid JSON, escalating");
            Verdict::fail_open()
        }
    }
}

/// Read the classifier's JSON reply, tolerating a surrounding code fence.
fn parse_verdict(content: &str) -> Option<Verdict> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let body = if body.is_empty() { "{}" } else { body };

    let wire: WireVerdict = serde_json::from_str(body).ok()?;
    Some(Verdict {
        should_process: wire.should_process != Some(false),
        confidence: wire
            .confidence
            .filter(|c| *c != 0.0 && c.is_finite())
            .unwrap_or(DEFAULT_CONFIDENCE),
        reason: wire.reason,
        suggested_response: wire.suggested_response,
    })
}

// ── Cost estimate ────────────────────────────────────────────────────────────

/// Per-message cost of the full model, in dollars.
pub const FULL_MODEL_COST: f64 = 0.01;
/// Per-message cost of the lightweight classifier, in dollars.
pub const LIGHT_MODEL_COST: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSavings {
    pub savings: f64,
    pub savings_percentage: f64,
    pub total_cost: f64,
    pub original_cost: f64,
}

/// What screening saved, given `filtered` of `total` messages were answered
/// without the full model.
pub fn estimate_cost_savings(total: u64, filtered: u64, full_cost: f64, light_cost: f64) -> CostSavings {
    let filtered = filtered.min(total);
    let original_cost = total as f64 * full_cost;
    let total_cost = filtered as f64 * light_cost + (total - filtered) as f64 * full_cost;
    let savings = original_cost - total_cost;
    let savings_percentage = if original_cost > 0.0 {
        savings / original_cost * 100.0
    } else {
        0.0
    };
    CostSavings {
        savings,
        savings_percentage,
        total_cost,
        original_cost,
    }
}
