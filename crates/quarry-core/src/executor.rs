//! The quarry tool executor: the audited, policy-bound tool dispatcher.
//!
//! The executor enforces the tool-call pipeline:
//!
//!   Parse → Verify arguments → Authorize → Audit → Dispatch
//!
//! The security invariant is absolute: a `DataBackend` method is NEVER
//! called unless `AccessPolicy::authorize()` returned `Allow` and the
//! decision was recorded. Every attempt produces exactly one audit entry,
//! and every model-recoverable failure comes back as `ToolResult::Error`
//! instead of an `Err`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use quarry_contracts::{
    access::{AccessContext, AccessVerdict},
    agent::{AgentConfig, TurnId, UserId},
    error::{QuarryError, QuarryResult},
    execution::{AuditKind, AuditLogEntry},
    tool::{DataArg, ToolCall, ToolError, ToolName, ToolRequest, ToolResult},
};

use crate::traits::{AccessPolicy, ArgumentVerifier, AuditSink, DataBackend};

/// Everything about the current turn a tool call is executed under.
#[derive(Clone, Copy)]
pub struct CallContext<'a> {
    pub agent: &'a AgentConfig,
    pub user_id: &'a UserId,
    pub turn_id: &'a TurnId,
    pub backend: &'a dyn DataBackend,
}

/// The central executor that runs tool calls against a backend.
///
/// Holds the trusted components and is shared by every turn; the backend and
/// agent arrive per call through `CallContext`.
pub struct ToolExecutor {
    policy: Arc<dyn AccessPolicy>,
    audit: Arc<dyn AuditSink>,
    verifier: Arc<dyn ArgumentVerifier>,
}

/// Identity of one attempt, carried into its audit entry.
struct Attempt<'a> {
    tool_call_id: Option<&'a str>,
    tool: &'a str,
}

impl ToolExecutor {
    pub fn new(
        policy: Arc<dyn AccessPolicy>,
        audit: Arc<dyn AuditSink>,
        verifier: Arc<dyn ArgumentVerifier>,
    ) -> Self {
        Self { policy, audit, verifier }
    }

    /// Execute a tool call exactly as the model sent it.
    ///
    /// Unknown tool names and unparseable arguments become `ToolResult::Error`
    /// after being audited. Only an audit failure returns `Err`.
    pub async fn execute_call(&self, ctx: &CallContext<'_>, call: &ToolCall) -> QuarryResult<ToolResult> {
        let attempt = Attempt {
            tool_call_id: Some(call.id.as_str()),
            tool: call.name.as_str(),
        };

        let Some(tool) = ToolName::parse(&call.name) else {
            warn!(turn_id = %ctx.turn_id, tool = %call.name, "model requested unsupported tool");
            return self.reject(
                ctx,
                &attempt,
                None,
                ToolError::UnsupportedTool {
                    tool: call.name.clone(),
                },
            );
        };

        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let arguments: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(turn_id = %ctx.turn_id, tool = %tool, error = %e, "tool arguments are not valid JSON");
                return self.reject(
                    ctx,
                    &attempt,
                    None,
                    ToolError::MalformedArguments { reason: e.to_string() },
                );
            }
        };

        self.run(ctx, &attempt, tool, arguments).await
    }

    /// Execute an already-typed request, as produced by the query planner.
    ///
    /// Goes through the same verify, authorize, and audit steps as a model
    /// call. `DataArg::FromSteps` must be resolved by the caller first.
    pub async fn execute_request(&self, ctx: &CallContext<'_>, request: &ToolRequest) -> QuarryResult<ToolResult> {
        let tool = request.tool();
        let attempt = Attempt {
            tool_call_id: None,
            tool: tool.as_str(),
        };
        self.run(ctx, &attempt, tool, request.arguments()).await
    }

    /// Mark the turn complete in the audit sink.
    pub fn finalize_turn(&self, turn_id: &TurnId) -> QuarryResult<()> {
        self.audit.finalize(&turn_id.to_string())
    }

    async fn run(
        &self,
        ctx: &CallContext<'_>,
        attempt: &Attempt<'_>,
        tool: ToolName,
        arguments: Value,
    ) -> QuarryResult<ToolResult> {
        // ── Step 1: Verify arguments against the declared schema ─────────────
        let report = self.verifier.verify(tool, &arguments)?;
        if !report.passed {
            let reason = report.summary();
            warn!(turn_id = %ctx.turn_id, tool = %tool, failures = %reason, "tool arguments failed verification");
            return self.reject(ctx, attempt, None, ToolError::InvalidArguments { reason });
        }

        // ── Step 2: Parse into the typed request ─────────────────────────────
        let request = match ToolRequest::parse(tool, arguments) {
            Ok(request) => request,
            Err(e) => {
                return self.reject(
                    ctx,
                    attempt,
                    None,
                    ToolError::InvalidArguments { reason: e.to_string() },
                );
            }
        };

        if let ToolRequest::Analyze(args) = &request {
            if let DataArg::FromSteps(steps) = &args.data {
                let reason = format!("data refers to {} unresolved plan steps", steps.len());
                return self.reject(ctx, attempt, None, ToolError::InvalidArguments { reason });
            }
        }

        // ── Step 3: Resolve the collection the call would read ───────────────
        let collection = request
            .collection()
            .or_else(|| ctx.backend.implicit_collection())
            .map(str::to_string);

        let reads_collection = match &request {
            ToolRequest::Analyze(args) => args.data.is_absent() || args.collection.is_some(),
            _ => true,
        };
        if reads_collection && collection.is_none() {
            return self.reject(
                ctx,
                attempt,
                None,
                ToolError::InvalidArguments {
                    reason: "a collection is required for this call".to_string(),
                },
            );
        }
        let collection = if reads_collection { collection } else { None };

        debug!(
            turn_id = %ctx.turn_id,
            tool = %tool,
            args = %request.summary(),
            backend = %ctx.backend.name(),
            "tool call parsed, authorizing"
        );

        // ── Step 4: Authorize ────────────────────────────────────────────────
        //
        // This is the primary trust gate. No backend call happens until Allow.
        let access_ctx = AccessContext {
            agent_id: ctx.agent.id.0.clone(),
            user_id: ctx.user_id.0.clone(),
            turn_id: ctx.turn_id.to_string(),
            tool: tool.as_str().to_string(),
            collection: collection.clone(),
            allowed_collections: ctx.agent.collections.to_vec(),
            allowed_tools: ctx
                .agent
                .allowed_tools
                .as_ref()
                .map(|tools| tools.iter().cloned().collect()),
            implicit_collection: ctx.backend.implicit_collection().map(str::to_string),
        };
        let verdict = self.policy.authorize(&access_ctx)?;

        // ── Step 5: Audit the decision, allowed or not ───────────────────────
        let kind = if collection.is_some() {
            AuditKind::DataAccess
        } else {
            AuditKind::ToolCall
        };
        self.write_entry(ctx, attempt, kind, collection.clone(), &verdict)?;

        if let AccessVerdict::Deny { reason } = &verdict {
            warn!(
                turn_id = %ctx.turn_id,
                agent_id = %ctx.agent.id.0,
                tool = %tool,
                collection = collection.as_deref().unwrap_or("-"),
                reason = %reason,
                "tool call denied"
            );
            let err = if !ctx.agent.tool_permitted(tool.as_str()) {
                ToolError::ToolNotPermitted {
                    tool: tool.as_str().to_string(),
                }
            } else {
                ToolError::NotAllowed {
                    collection: collection.unwrap_or_default(),
                }
            };
            return Ok(ToolResult::Error(err));
        }

        // ── Step 6: Dispatch ─────────────────────────────────────────────────
        //
        // Only reachable after Allow has been recorded.
        let outcome = self.dispatch(ctx.backend, &request, collection.as_deref()).await;
        match outcome {
            Ok(result) => {
                info!(
                    turn_id = %ctx.turn_id,
                    tool = %tool,
                    collection = collection.as_deref().unwrap_or("-"),
                    is_error = result.is_error(),
                    "tool call executed"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(turn_id = %ctx.turn_id, tool = %tool, error = %e, "backend failed");
                Ok(ToolResult::Error(ToolError::Backend { reason: e.to_string() }))
            }
        }
    }

    async fn dispatch(
        &self,
        backend: &dyn DataBackend,
        request: &ToolRequest,
        collection: Option<&str>,
    ) -> QuarryResult<ToolResult> {
        match request {
            ToolRequest::Query(args) => {
                let collection = collection.unwrap_or(args.collection.as_str());
                let rows = backend.query_collection(collection, &args.filters).await?;
                Ok(ToolResult::Rows(rows))
            }
            ToolRequest::Analyze(args) => backend.analyze_data(collection, args).await,
            ToolRequest::Schema(_) => {
                let collection = collection.ok_or_else(|| QuarryError::InvalidRequest {
                    reason: "schema request without a collection".to_string(),
                })?;
                Ok(ToolResult::Schema(backend.collection_schema(collection).await?))
            }
        }
    }

    /// Record a rejection that happened before authorization and return it
    /// as a tool result.
    fn reject(
        &self,
        ctx: &CallContext<'_>,
        attempt: &Attempt<'_>,
        collection: Option<String>,
        err: ToolError,
    ) -> QuarryResult<ToolResult> {
        let verdict = AccessVerdict::Deny { reason: err.to_string() };
        self.write_entry(ctx, attempt, AuditKind::ToolCall, collection, &verdict)?;
        Ok(ToolResult::Error(err))
    }

    fn write_entry(
        &self,
        ctx: &CallContext<'_>,
        attempt: &Attempt<'_>,
        kind: AuditKind,
        collection: Option<String>,
        verdict: &AccessVerdict,
    ) -> QuarryResult<()> {
        let entry = AuditLogEntry {
            entry_id: uuid::Uuid::new_v4(),
            kind,
            agent_id: ctx.agent.id.0.clone(),
            user_id: ctx.user_id.0.clone(),
            turn_id: ctx.turn_id.to_string(),
            tool_call_id: attempt.tool_call_id.map(str::to_string),
            tool: attempt.tool.to_string(),
            collection,
            allowed: verdict.is_allowed(),
            reason: verdict.reason().map(str::to_string),
            timestamp: Utc::now(),
        };
        self.audit.record(&entry).map_err(|e| match e {
            QuarryError::AuditWriteFailed { .. } => e,
            other => QuarryError::AuditWriteFailed {
                reason: other.to_string(),
            },
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use quarry_contracts::{
        access::{AccessContext, AccessVerdict},
        agent::{AgentConfig, TurnId, UserId},
        collection::CollectionSet,
        error::{QuarryError, QuarryResult},
        execution::{AuditKind, AuditLogEntry},
        tool::{
            AnalyzeArgs, CollectionSchema, QueryArgs, QueryFilters, Row, Statistics, ToolCall,
            ToolError, ToolName, ToolRequest, ToolResult,
        },
        verify::{VerificationFailure, VerificationReport},
    };

    use crate::traits::{AccessPolicy, ArgumentVerifier, AuditSink, DataBackend};

    use super::{CallContext, ToolExecutor};

    // ── Mock helpers ─────────────────────────────────────────────────────────

    /// A policy that allows exactly the agent's allow-list plus the implicit
    /// collection, and checks the tool allow-list.
    struct ListPolicy;

    impl AccessPolicy for ListPolicy {
        fn authorize(&self, ctx: &AccessContext) -> QuarryResult<AccessVerdict> {
            if let Some(tools) = &ctx.allowed_tools {
                if !tools.is_empty() && !tools.contains(&ctx.tool) {
                    return Ok(AccessVerdict::Deny {
                        reason: "tool not enabled".to_string(),
                    });
                }
            }
            match &ctx.collection {
                None => Ok(AccessVerdict::Allow),
                Some(c) if ctx.allowed_collections.contains(c) => Ok(AccessVerdict::Allow),
                Some(c) if ctx.implicit_collection.as_ref() == Some(c) => Ok(AccessVerdict::Allow),
                Some(_) => Ok(AccessVerdict::Deny {
                    reason: "collection not on allow-list".to_string(),
                }),
            }
        }
    }

    /// An audit sink that records every entry for later inspection.
    struct MockAudit {
        entries: Arc<Mutex<Vec<AuditLogEntry>>>,
        fail: bool,
    }

    impl MockAudit {
        fn new() -> Self {
            Self {
                entries: Arc::new(Mutex::new(vec![])),
                fail: false,
            }
        }
    }

    impl AuditSink for MockAudit {
        fn record(&self, entry: &AuditLogEntry) -> QuarryResult<()> {
            if self.fail {
                return Err(QuarryError::AuditWriteFailed {
                    reason: "disk full".to_string(),
                });
            }
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        fn finalize(&self, _turn_id: &str) -> QuarryResult<()> {
            Ok(())
        }
    }

    /// A verifier that can be configured to pass or fail.
    struct MockVerifier {
        pass: bool,
    }

    impl ArgumentVerifier for MockVerifier {
        fn verify(&self, _tool: ToolName, _arguments: &Value) -> QuarryResult<VerificationReport> {
            if self.pass {
                Ok(VerificationReport::pass())
            } else {
                Ok(VerificationReport::from_failures(vec![VerificationFailure {
                    rule_id: "schema".to_string(),
                    message: "/filters/limit: \"ten\" is not of type \"integer\"".to_string(),
                }]))
            }
        }
    }

    /// A backend that counts calls and returns canned rows.
    struct MockBackend {
        queries: Arc<Mutex<Vec<String>>>,
        implicit: Option<&'static str>,
        fail: bool,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                queries: Arc::new(Mutex::new(vec![])),
                implicit: None,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl DataBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        fn implicit_collection(&self) -> Option<&str> {
            self.implicit
        }

        async fn query_collection(&self, collection: &str, _filters: &QueryFilters) -> QuarryResult<Vec<Row>> {
            self.queries.lock().unwrap().push(collection.to_string());
            if self.fail {
                return Err(QuarryError::Transport {
                    reason: "connection reset".to_string(),
                });
            }
            let row = json!({ "id": "txn_1", "amount": -120.0 });
            Ok(vec![row.as_object().cloned().unwrap()])
        }

        async fn analyze_data(&self, _collection: Option<&str>, _args: &AnalyzeArgs) -> QuarryResult<ToolResult> {
            Ok(ToolResult::Statistics(Statistics {
                count: 1,
                sum: 1.0,
                average: 1.0,
                min: 1.0,
                max: 1.0,
            }))
        }

        async fn collection_schema(&self, collection: &str) -> QuarryResult<CollectionSchema> {
            Ok(CollectionSchema {
                collection: collection.to_string(),
                fields: vec!["id".to_string()],
                row_count: None,
                row_indices: false,
            })
        }
    }

    fn finance_agent() -> AgentConfig {
        AgentConfig::new(
            "finance-analyst",
            "user-1",
            CollectionSet::from(vec!["finance_transactions".to_string()]),
        )
    }

    fn executor(audit: MockAudit, verifier_passes: bool) -> ToolExecutor {
        ToolExecutor::new(
            Arc::new(ListPolicy),
            Arc::new(audit),
            Arc::new(MockVerifier { pass: verifier_passes }),
        )
    }

    fn query_call(collection: &str) -> ToolCall {
        ToolCall::new(
            "call_1",
            "query_collection",
            json!({ "collection": collection }).to_string(),
        )
    }

    // ── Test cases ───────────────────────────────────────────────────────────

    /// Core security test: a denied collection must never reach the backend,
    /// and exactly one denied entry is recorded.
    #[tokio::test]
    async fn test_denied_collection_never_reaches_backend() {
        let audit = MockAudit::new();
        let entries = audit.entries.clone();
        let exec = executor(audit, true);
        let backend = MockBackend::new();
        let queries = backend.queries.clone();
        let agent = finance_agent();
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let result = exec.execute_call(&ctx, &query_call("payroll_secrets")).await.unwrap();

        assert!(matches!(
            result,
            ToolResult::Error(ToolError::NotAllowed { ref collection }) if collection == "payroll_secrets"
        ));
        assert!(queries.lock().unwrap().is_empty(), "backend must not be queried");

        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].allowed);
        assert_eq!(entries[0].kind, AuditKind::DataAccess);
        assert_eq!(entries[0].collection.as_deref(), Some("payroll_secrets"));
        assert_eq!(entries[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_allowed_collection_is_queried_and_audited_once() {
        let audit = MockAudit::new();
        let entries = audit.entries.clone();
        let exec = executor(audit, true);
        let backend = MockBackend::new();
        let queries = backend.queries.clone();
        let agent = finance_agent();
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let result = exec
            .execute_call(&ctx, &query_call("finance_transactions"))
            .await
            .unwrap();

        assert_eq!(result.rows().map(|r| r.len()), Some(1));
        assert_eq!(*queries.lock().unwrap(), vec!["finance_transactions".to_string()]);
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].allowed);
    }

    /// A backend failure after an allowed decision still leaves exactly one
    /// allowed entry, so audits can tell it apart from a denial.
    #[tokio::test]
    async fn test_backend_failure_becomes_tool_error() {
        let audit = MockAudit::new();
        let entries = audit.entries.clone();
        let exec = executor(audit, true);
        let backend = MockBackend {
            fail: true,
            ..MockBackend::new()
        };
        let agent = finance_agent();
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let result = exec
            .execute_call(&ctx, &query_call("finance_transactions"))
            .await
            .unwrap();

        assert!(matches!(result, ToolResult::Error(ToolError::Backend { .. })));
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].allowed);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_typed_error_and_audited() {
        let audit = MockAudit::new();
        let entries = audit.entries.clone();
        let exec = executor(audit, true);
        let backend = MockBackend::new();
        let agent = finance_agent();
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let call = ToolCall::new("call_9", "delete_everything", "{}");
        let result = exec.execute_call(&ctx, &call).await.unwrap();

        assert!(matches!(result, ToolResult::Error(ToolError::UnsupportedTool { .. })));
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, AuditKind::ToolCall);
        assert!(!entries[0].allowed);
    }

    #[tokio::test]
    async fn test_malformed_json_is_typed_error() {
        let exec = executor(MockAudit::new(), true);
        let backend = MockBackend::new();
        let agent = finance_agent();
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let call = ToolCall::new("call_2", "query_collection", "{\"collection\": ");
        let result = exec.execute_call(&ctx, &call).await.unwrap();

        assert!(matches!(result, ToolResult::Error(ToolError::MalformedArguments { .. })));
    }

    #[tokio::test]
    async fn test_verification_failure_blocks_dispatch() {
        let exec = executor(MockAudit::new(), false);
        let backend = MockBackend::new();
        let queries = backend.queries.clone();
        let agent = finance_agent();
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let result = exec
            .execute_call(&ctx, &query_call("finance_transactions"))
            .await
            .unwrap();

        match result {
            ToolResult::Error(ToolError::InvalidArguments { reason }) => {
                assert!(reason.contains("limit"), "reason should name the failing field: {}", reason);
            }
            other => panic!("expected InvalidArguments, got {:?}", other),
        }
        assert!(queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tool_allow_list_denies_tool() {
        let audit = MockAudit::new();
        let entries = audit.entries.clone();
        let exec = executor(audit, true);
        let backend = MockBackend::new();
        let mut agent = finance_agent();
        agent.allowed_tools = Some(["analyze_data".to_string()].into_iter().collect());
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let result = exec
            .execute_call(&ctx, &query_call("finance_transactions"))
            .await
            .unwrap();

        assert!(matches!(result, ToolResult::Error(ToolError::ToolNotPermitted { .. })));
        assert_eq!(entries.lock().unwrap().len(), 1);
    }

    /// Schema requests without a collection fall back to the backend's
    /// implicit collection, which the policy allows.
    #[tokio::test]
    async fn test_implicit_collection_is_used_and_allowed() {
        let exec = executor(MockAudit::new(), true);
        let backend = MockBackend {
            implicit: Some("uploaded_data"),
            ..MockBackend::new()
        };
        let agent = AgentConfig::new("upload", "user-1", CollectionSet::default());
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let call = ToolCall::new("call_3", "get_collection_schema", "");
        let result = exec.execute_call(&ctx, &call).await.unwrap();

        match result {
            ToolResult::Schema(schema) => assert_eq!(schema.collection, "uploaded_data"),
            other => panic!("expected Schema, got {:?}", other),
        }
    }

    /// Analysis over inline rows reads no collection and is audited as a
    /// plain tool call.
    #[tokio::test]
    async fn test_inline_analysis_records_tool_call_entry() {
        let audit = MockAudit::new();
        let entries = audit.entries.clone();
        let exec = executor(audit, true);
        let backend = MockBackend::new();
        let agent = finance_agent();
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let call = ToolCall::new(
            "call_4",
            "analyze_data",
            json!({ "data": [{ "amount": 1 }], "analysisType": "statistics" }).to_string(),
        );
        let result = exec.execute_call(&ctx, &call).await.unwrap();

        assert!(matches!(result, ToolResult::Statistics(_)));
        let entries = entries.lock().unwrap();
        assert_eq!(entries[0].kind, AuditKind::ToolCall);
        assert!(entries[0].collection.is_none());
        assert!(entries[0].allowed);
    }

    /// A call that cannot be audited must not be executed.
    #[tokio::test]
    async fn test_audit_failure_is_fatal() {
        let exec = executor(
            MockAudit {
                fail: true,
                ..MockAudit::new()
            },
            true,
        );
        let backend = MockBackend::new();
        let queries = backend.queries.clone();
        let agent = finance_agent();
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let result = exec
            .execute_call(&ctx, &query_call("finance_transactions"))
            .await;

        assert!(matches!(result, Err(QuarryError::AuditWriteFailed { .. })));
        assert!(queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_typed_request_goes_through_same_gate() {
        let audit = MockAudit::new();
        let entries = audit.entries.clone();
        let exec = executor(audit, true);
        let backend = MockBackend::new();
        let agent = finance_agent();
        let user = UserId("user-1".to_string());
        let turn = TurnId::new();
        let ctx = CallContext {
            agent: &agent,
            user_id: &user,
            turn_id: &turn,
            backend: &backend,
        };

        let request = ToolRequest::Query(QueryArgs {
            collection: "sales_deals".to_string(),
            filters: QueryFilters::default(),
        });
        let result = exec.execute_request(&ctx, &request).await.unwrap();

        assert!(matches!(result, ToolResult::Error(ToolError::NotAllowed { .. })));
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].tool_call_id.is_none());
    }
}
