//! Core trait definitions for the quarry tool pipeline.
//!
//! These four traits define the complete trust boundary:
//!
//! - `DataBackend`      : where rows come from (live store, upload, demo)
//! - `AccessPolicy`     : trusted gate, evaluated before any backend call
//! - `AuditSink`        : trusted sink, records every tool-call attempt once
//! - `ArgumentVerifier` : trusted checker for model-supplied arguments
//!
//! The executor wires them together in the correct order. A backend is never
//! called unless the policy first returns `Allow` and the decision has been
//! recorded.
//!
//! `ConversationSink` sits outside that boundary: it receives the finished
//! exchange after a turn succeeds.

use async_trait::async_trait;
use serde_json::Value;

use quarry_contracts::{
    access::{AccessContext, AccessVerdict},
    agent::{AgentId, UserId},
    error::QuarryResult,
    execution::AuditLogEntry,
    message::ConversationMessage,
    tool::{AnalyzeArgs, CollectionSchema, QueryFilters, Row, ToolName, ToolResult},
    verify::VerificationReport,
};

/// A source of rows that every tool call is eventually served from.
///
/// All backends implement identical filter and analysis semantics so the
/// model's tool-call shape does not depend on which one is active. The
/// executor guarantees every method is only called for a collection the
/// policy allowed.
#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Short name for logs, e.g. `"demo"`.
    fn name(&self) -> &str;

    /// The single collection this backend represents, for uploads and the
    /// demo dataset. Live stores return `None`.
    fn implicit_collection(&self) -> Option<&str> {
        None
    }

    /// Apply `filters` to `collection` and return at most `limit` rows.
    async fn query_collection(&self, collection: &str, filters: &QueryFilters) -> QuarryResult<Vec<Row>>;

    /// Run an analysis over inline rows or, when `args.data` is absent, over
    /// all rows of `collection`.
    ///
    /// Empty or non-numeric input is a `ToolResult::Error`, not an `Err`.
    async fn analyze_data(&self, collection: Option<&str>, args: &AnalyzeArgs) -> QuarryResult<ToolResult>;

    /// The field list of `collection`.
    async fn collection_schema(&self, collection: &str) -> QuarryResult<CollectionSchema>;
}

/// The access policy: the gate in front of every backend call.
///
/// Implementations are **trusted** and must be deterministic and fast. Avoid
/// I/O here.
pub trait AccessPolicy: Send + Sync {
    /// Decide whether the described tool call may proceed.
    fn authorize(&self, ctx: &AccessContext) -> QuarryResult<AccessVerdict>;
}

/// The audit sink: the immutable record of tool-call attempts.
///
/// Every attempt, whatever its outcome, produces exactly one entry. A failed
/// write is fatal: the call is not executed and
/// `QuarryError::AuditWriteFailed` is returned.
pub trait AuditSink: Send + Sync {
    /// Append one entry. Entries are never modified or deleted.
    fn record(&self, entry: &AuditLogEntry) -> QuarryResult<()>;

    /// Mark a turn as complete. Implementations may flush or seal here.
    fn finalize(&self, turn_id: &str) -> QuarryResult<()>;
}

/// The argument verifier: checks model-supplied arguments before use.
///
/// Implementations must not touch backends. They inspect the decoded JSON
/// against the tool's declared parameters and return a report.
pub trait ArgumentVerifier: Send + Sync {
    fn verify(&self, tool: ToolName, arguments: &Value) -> QuarryResult<VerificationReport>;
}

/// The conversation store's append side.
///
/// Conversations are scoped to one agent and one user and are append-only.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    /// Append `messages`, oldest first, to the conversation.
    async fn append(&self, agent: &AgentId, user: &UserId, messages: &[ConversationMessage]) -> QuarryResult<()>;
}
