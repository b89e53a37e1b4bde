//! Agent identity and configuration types.
//!
//! An `AgentConfig` is immutable for the duration of one turn. It is created
//! and edited elsewhere; the runtime only reads it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::collection::CollectionSet;

/// Stable identifier for a user-defined agent.
///
/// Appears in every audit entry and analytics counter.
/// Example: AgentId("finance-analyst")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

/// Identifier of the user who owns an agent or is chatting with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Unique identifier for a single conversation turn.
///
/// Every audit entry written while a turn is running carries this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub uuid::Uuid);

impl TurnId {
    /// Create a new, unique turn id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The model vendor an agent talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Anthropic,
    Google,
    /// Any OpenAI-compatible endpoint configured by base URL.
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider + model pair used for the full orchestration model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-agent key override. Falls back to process configuration when absent.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: default_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningDepth {
    Quick,
    #[default]
    Moderate,
    Deep,
}

/// How much step-by-step reasoning the system prompt asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub enabled: bool,
    pub depth: ReasoningDepth,
    pub show_reasoning: bool,
    pub max_steps: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            depth: ReasoningDepth::Moderate,
            show_reasoning: true,
            max_steps: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Professional,
    #[default]
    Conversational,
    Technical,
    Friendly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Brief,
    #[default]
    Moderate,
    Detailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseStyle {
    pub tone: Tone,
    pub detail_level: DetailLevel,
    pub include_numbers: bool,
    pub include_sources: bool,
    pub format_output: bool,
}

impl Default for ResponseStyle {
    fn default() -> Self {
        Self {
            tone: Tone::Conversational,
            detail_level: DetailLevel::Moderate,
            include_numbers: true,
            include_sources: false,
            format_output: true,
        }
    }
}

/// Per-agent cost-optimization toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostOptimization {
    /// Run the lightweight-model classifier before the full call.
    pub pre_screening: bool,
    /// Use the deterministic query planner for multi-step questions.
    pub query_planning: bool,
}

impl Default for CostOptimization {
    fn default() -> Self {
        Self {
            pre_screening: true,
            query_planning: false,
        }
    }
}

/// Everything the runtime needs to know about an agent for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: AgentId,
    pub owner: UserId,
    /// The allow-list: the only collections this agent may read.
    pub collections: CollectionSet,
    /// Optional tool allow-list. `None` exposes every supported tool.
    #[serde(default)]
    pub allowed_tools: Option<BTreeSet<String>>,
    #[serde(default)]
    pub model: ModelSelection,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub response_style: ResponseStyle,
    #[serde(default)]
    pub cost: CostOptimization,
}

impl AgentConfig {
    /// A config with default model and style settings over the given allow-list.
    pub fn new(id: impl Into<String>, owner: impl Into<String>, collections: CollectionSet) -> Self {
        Self {
            id: AgentId(id.into()),
            owner: UserId(owner.into()),
            collections,
            allowed_tools: None,
            model: ModelSelection::default(),
            reasoning: ReasoningConfig::default(),
            response_style: ResponseStyle::default(),
            cost: CostOptimization::default(),
        }
    }

    /// Return true if the agent may invoke `tool`.
    pub fn tool_permitted(&self, tool: &str) -> bool {
        match &self.allowed_tools {
            Some(tools) if !tools.is_empty() => tools.contains(tool),
            _ => true,
        }
    }
}
