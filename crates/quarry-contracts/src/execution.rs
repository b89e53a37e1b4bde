//! Audit records and turn outcomes.
//!
//! `AuditLogEntry` is what gets written to the audit log, exactly one per
//! tool-call attempt. `TurnResponse` is what the runtime hands back to the
//! caller at the end of a conversation turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::insight::Insight;

/// Which boundary produced an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A collection authorization decision.
    DataAccess,
    /// A call rejected before it reached authorization (unknown tool,
    /// unparseable or invalid arguments) or one that touches no collection.
    ToolCall,
}

/// An immutable record of one tool-call attempt.
///
/// Written whether the call was allowed or denied and regardless of whether
/// the subsequent execution succeeded. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub entry_id: uuid::Uuid,
    pub kind: AuditKind,
    pub agent_id: String,
    pub user_id: String,
    pub turn_id: String,
    /// The model's id for the call, when it came from the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub tool: String,
    /// The collection the call asked for, when one was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Operator query over the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListAuditLogsParams {
    pub agent_id: String,
    pub user_id: String,
    #[serde(default)]
    pub kind: Option<AuditKind>,
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    50
}

impl ListAuditLogsParams {
    pub fn new(agent_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            kind: None,
            limit: default_audit_limit(),
        }
    }
}

/// Row-level provenance for an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sources {
    /// Distinct `_rowIndex` values, ascending.
    pub row_indices: Vec<u64>,
}

/// How a turn was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engagement {
    /// Answered by the cost optimizer without the full model.
    ShortCircuit,
    /// Went through the full orchestration loop.
    FullModel,
}

/// The final result of one conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub turn_id: String,
    pub response: String,
    /// Present only when at least one row index was seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Sources>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<Insight>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up_questions: Vec<String>,
    pub engagement: Engagement,
    /// Why the cost optimizer escalated or short-circuited.
    pub engagement_reason: String,
    /// Model calls made, including the pre-screen classifier.
    pub model_calls: u32,
    pub tool_calls: u32,
}
