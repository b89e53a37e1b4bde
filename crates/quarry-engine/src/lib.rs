//! # quarry-engine
//!
//! Everything between an inbound chat message and the answer that goes back:
//! screening, query planning, the model ⇄ tool loop, and the insights and
//! follow-ups attached to the reply.
//!
//! This crate provides:
//! - `Engine`, which runs one turn under a rate limit, a timeout, and a
//!   cancellation token
//! - The cost optimizer (`screen`): canned replies, heuristics, and an
//!   optional lightweight classifier in front of the full model
//! - The query planner (`planner`) and its dependency-ordered executor
//! - The system prompt builder, insight generator, and currency formatting
//! - Per-agent usage counters
//! - An in-memory conversation log the engine appends each exchange to
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quarry_engine::{Engine, EngineConfig, TurnRequest};
//!
//! let engine = Engine::standard(EngineConfig::default(), provider, audit)?;
//! let response = engine.run_turn(request, CancellationToken::new()).await?;
//! ```

pub mod analytics;
pub mod config;
pub mod conversation;
pub mod currency;
pub mod insight;
pub mod planner;
pub mod prompt;
pub mod screen;
pub mod turn;

pub use analytics::{AgentAnalytics, AgentStats};
pub use config::EngineConfig;
pub use conversation::InMemoryConversationLog;
pub use currency::{format_currency, Currency};
pub use insight::{generate_follow_up_questions, generate_insights};
pub use planner::{execute_query_plan, generate_query_plan, needs_multi_step_planning, PlanOutcome, StepRunner};
pub use prompt::{build_system_prompt, UploadContext};
pub use screen::{estimate_cost_savings, smart_engage, CostSavings, PreScreen, Screening};
pub use turn::{Engine, TurnRequest, NO_RESPONSE};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use quarry_audit::InMemoryAuditLog;
    use quarry_backends::{
        parse_upload, ColumnDetector, DemoBackend, IngestLimits, UploadBackend, UploadSessionStore, UPLOAD_COLLECTION,
    };
    use quarry_contracts::{
        agent::{AgentConfig, ProviderKind, UserId},
        collection::CollectionSet,
        error::{QuarryError, QuarryResult},
        execution::Engagement,
        message::{ChatRequest, ChatResponse, Role, ToolChoice},
        tool::{AnalyzeArgs, CollectionSchema, QueryFilters, Row, ToolCall, ToolResult},
    };
    use quarry_core::traits::DataBackend;
    use quarry_provider::{ProviderClient, ScriptedProvider};

    use crate::{format_currency, Currency, Engine, EngineConfig, InMemoryConversationLog, TurnRequest};

    // ── Mock helpers ─────────────────────────────────────────────────────────

    /// The demo backend with a counter on `query_collection`.
    struct CountingBackend {
        inner: DemoBackend,
        queries: Arc<AtomicUsize>,
    }

    impl CountingBackend {
        fn new() -> Self {
            Self {
                inner: DemoBackend::generate(),
                queries: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl DataBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting-demo"
        }

        fn implicit_collection(&self) -> Option<&str> {
            self.inner.implicit_collection()
        }

        async fn query_collection(&self, collection: &str, filters: &QueryFilters) -> QuarryResult<Vec<Row>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.query_collection(collection, filters).await
        }

        async fn analyze_data(&self, collection: Option<&str>, args: &AnalyzeArgs) -> QuarryResult<ToolResult> {
            self.inner.analyze_data(collection, args).await
        }

        async fn collection_schema(&self, collection: &str) -> QuarryResult<CollectionSchema> {
            self.inner.collection_schema(collection).await
        }
    }

    /// A provider that never answers in time.
    struct StalledProvider;

    #[async_trait]
    impl ProviderClient for StalledProvider {
        async fn call(
            &self,
            _provider: ProviderKind,
            _model: &str,
            _request: &ChatRequest,
            _api_key: Option<&str>,
        ) -> QuarryResult<ChatResponse> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ChatResponse::text("too late"))
        }
    }

    fn finance_agent() -> AgentConfig {
        let mut agent = AgentConfig::new(
            "finance-analyst",
            "user-1",
            ["finance_transactions"].into_iter().collect::<CollectionSet>(),
        );
        agent.cost.pre_screening = false;
        agent
    }

    fn user() -> UserId {
        UserId("user-1".to_string())
    }

    fn engine_with(config: EngineConfig, provider: Arc<dyn ProviderClient>, audit: &InMemoryAuditLog) -> Engine {
        Engine::standard(config, provider, audit.clone()).unwrap()
    }

    fn request<'a>(
        agent: &'a AgentConfig,
        user: &'a UserId,
        message: &'a str,
        backend: &'a dyn DataBackend,
    ) -> TurnRequest<'a> {
        TurnRequest {
            agent,
            user_id: user,
            message,
            history: &[],
            backend,
            upload: None,
            forwarded_for: None,
        }
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall::new(id, name, arguments.to_string())
    }

    // ── Test cases ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_greeting_is_answered_without_a_model_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let mut agent = finance_agent();
        agent.cost.pre_screening = true;
        let backend = DemoBackend::generate();
        let user = user();

        let response = engine
            .run_turn(request(&agent, &user, "hi", &backend), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.engagement, Engagement::ShortCircuit);
        assert_eq!(response.model_calls, 0);
        assert_eq!(provider.call_count(), 0);
        assert!(audit.is_empty());
        assert_eq!(engine.analytics().stats(&agent.id).short_circuited, 1);
    }

    /// Demo data, one query and one statistics round-trip, then an answer
    /// quoting the computed total.
    #[tokio::test]
    async fn test_burn_rate_question_runs_query_then_statistics() {
        let provider = Arc::new(ScriptedProvider::from_fn(|req: &ChatRequest| {
            let stats: Value = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Tool)
                .and_then(|m| serde_json::from_str(&m.content).ok())
                .unwrap_or(Value::Null);
            let sum = stats["sum"].as_f64().unwrap_or(0.0);
            Ok(ChatResponse::text(format!(
                "Your net cash flow this month is {}.",
                format_currency(sum, Currency::Usd)
            )))
        }));
        provider.push_tool_calls(vec![call(
            "call_q",
            "query_collection",
            json!({ "collection": "finance_transactions", "filters": { "limit": 100 } }),
        )]);
        provider.push_tool_calls(vec![call(
            "call_a",
            "analyze_data",
            json!({ "collection": "finance_transactions", "analysisType": "statistics" }),
        )]);

        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let agent = finance_agent();
        let backend = DemoBackend::generate();
        let user = user();

        let response = engine
            .run_turn(
                request(&agent, &user, "What's our burn rate this month?", &backend),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.engagement, Engagement::FullModel);
        assert_eq!(response.tool_calls, 2);
        assert_eq!(response.model_calls, 3);
        assert!(response.response.contains('$'), "answer: {}", response.response);

        let entries = audit.entries_for_turn(&response.turn_id);
        let tools: Vec<&str> = entries.iter().map(|e| e.tool.as_str()).collect();
        assert_eq!(tools, vec!["query_collection", "analyze_data"]);
        assert!(entries.iter().all(|e| e.allowed));
        assert!(audit.verify_integrity());
        assert!(response.follow_up_questions.len() <= 3);
        assert!(response.insights.len() <= 3);
    }

    /// Core security test: a denied collection is audited once and the
    /// backend is never queried.
    #[tokio::test]
    async fn test_denied_collection_is_audited_and_never_queried() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_tool_calls(vec![call(
            "call_1",
            "query_collection",
            json!({ "collection": "payroll_secrets" }),
        )]);
        provider.push_text("I don't have access to payroll data.");

        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let agent = finance_agent();
        let backend = CountingBackend::new();
        let queries = Arc::clone(&backend.queries);
        let user = user();

        let response = engine
            .run_turn(
                request(&agent, &user, "Show me the payroll data", &backend),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(queries.load(Ordering::SeqCst), 0, "backend must not be queried");
        let entries = audit.entries_for_turn(&response.turn_id);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].allowed);
        assert_eq!(entries[0].collection.as_deref(), Some("payroll_secrets"));
        assert!(response.sources.is_none());

        let tool_message = &provider.calls()[1].request.messages;
        let last = tool_message.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.content.contains("not_allowed") || last.content.contains("not allowed"));
        assert_eq!(engine.analytics().stats(&agent.id).denied_tool_calls, 1);
    }

    #[tokio::test]
    async fn test_planned_question_injects_step_results_before_first_model_call() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("Software spend is concentrated in two vendors.");

        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let mut agent = finance_agent();
        agent.cost.query_planning = true;
        let backend = DemoBackend::generate();
        let user = user();

        let response = engine
            .run_turn(
                request(
                    &agent,
                    &user,
                    "What's our total spend on software grouped by vendor over the last 3 months compared to the prior quarter?",
                    &backend,
                ),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.model_calls, 1);
        assert!(response.tool_calls >= 2);

        let first = &provider.calls()[0].request;
        let planned: Vec<&str> = first
            .messages
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.name.as_str()))
            .collect();
        assert!(planned.contains(&"query_collection"));
        assert_eq!(planned.last(), Some(&"analyze_data"));
        assert!(first.messages.iter().any(|m| m.role == Role::Tool && m.content.contains("group")));

        let entries = audit.entries_for_turn(&response.turn_id);
        assert_eq!(entries.len() as u32, response.tool_calls);
        assert!(entries.iter().all(|e| e.allowed));
    }

    #[tokio::test]
    async fn test_planned_turn_for_anthropic_agent_has_no_empty_assistant_turn() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("Software spend rose against the prior quarter.");

        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let mut agent = finance_agent();
        agent.model.provider = ProviderKind::Anthropic;
        agent.model.model = "claude-3-5-sonnet-latest".to_string();
        agent.cost.query_planning = true;
        let backend = DemoBackend::generate();
        let user = user();

        engine
            .run_turn(
                request(
                    &agent,
                    &user,
                    "What's our total spend on software grouped by vendor over the last 3 months compared to the prior quarter?",
                    &backend,
                ),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let recorded = provider.calls();
        assert_eq!(recorded[0].provider, ProviderKind::Anthropic);
        let assistant: Vec<_> = recorded[0]
            .request
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert!(!assistant.is_empty());
        assert!(assistant.iter().all(|m| !m.content.trim().is_empty()));
        assert!(assistant[0].content.starts_with("Running a "));
    }

    #[tokio::test]
    async fn test_finished_exchange_is_appended_to_the_conversation() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("Spend is flat this month.");
        provider.push_text("Software leads the categories.");

        let audit = InMemoryAuditLog::new();
        let conversations = InMemoryConversationLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit)
            .with_conversation_sink(Arc::new(conversations.clone()));
        let agent = finance_agent();
        let backend = DemoBackend::generate();
        let user = user();

        engine
            .run_turn(request(&agent, &user, "How is spend trending?", &backend), CancellationToken::new())
            .await
            .unwrap();

        let history = conversations.history(&agent.id, &user);
        engine
            .run_turn(
                TurnRequest {
                    history: &history,
                    ..request(&agent, &user, "Which category costs most?", &backend)
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let stored = conversations.history(&agent.id, &user);
        let roles: Vec<Role> = stored.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(stored[1].content, "Spend is flat this month.");
        assert_eq!(stored[3].content, "Software leads the categories.");

        // The second call saw the first exchange as context.
        let second = &provider.calls()[1].request;
        assert!(second.messages.iter().any(|m| m.content == "Spend is flat this month."));
    }

    #[tokio::test]
    async fn test_tool_loop_cap_forces_final_call_without_tools() {
        let counter = AtomicUsize::new(0);
        let provider = Arc::new(ScriptedProvider::from_fn(move |req: &ChatRequest| {
            if req.tools.is_none() {
                return Ok(ChatResponse::text("Here is what I found so far."));
            }
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                content: String::new(),
                tool_calls: Some(vec![ToolCall::new(
                    format!("call_{}", n),
                    "get_collection_schema",
                    json!({ "collection": "finance_transactions" }).to_string(),
                )]),
            })
        }));

        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let agent = finance_agent();
        let backend = DemoBackend::generate();
        let user = user();

        let response = engine
            .run_turn(
                request(&agent, &user, "Show me every field in the finance data", &backend),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.response, "Here is what I found so far.");
        assert_eq!(response.model_calls, 6);
        assert_eq!(response.tool_calls, 5);

        let calls = provider.calls();
        let last = &calls.last().unwrap().request;
        assert!(last.tools.is_none());
        assert!(last.tool_choice.is_none());
        assert!(calls[..5]
            .iter()
            .all(|c| c.request.tool_choice == Some(ToolChoice::Auto)));
    }

    #[tokio::test]
    async fn test_duplicate_tool_call_id_executes_once() {
        let provider = Arc::new(ScriptedProvider::new());
        let query = call(
            "call_1",
            "query_collection",
            json!({ "collection": "finance_transactions", "filters": { "limit": 5 } }),
        );
        provider.push_tool_calls(vec![query.clone()]);
        provider.push_tool_calls(vec![query]);
        provider.push_text("Those are the latest five transactions.");

        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let agent = finance_agent();
        let backend = CountingBackend::new();
        let queries = Arc::clone(&backend.queries);
        let user = user();

        let response = engine
            .run_turn(
                request(&agent, &user, "Show the latest transactions", &backend),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(queries.load(Ordering::SeqCst), 1);
        assert_eq!(response.tool_calls, 1);
        assert_eq!(audit.entries_for_turn(&response.turn_id).len(), 1);

        let replayed = provider.calls()[2].request.messages.clone();
        let results: Vec<_> = replayed.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, results[1].content);
    }

    #[tokio::test]
    async fn test_upload_turn_cites_sorted_row_indices() {
        let sheet = parse_upload(
            b"date,amount,category\n2024-01-05,-120,Software\n2024-01-09,-80,Travel\n2024-01-12,500,Income\n",
            "january.csv",
            &IngestLimits::default(),
        )
        .unwrap();
        let store = UploadSessionStore::new(chrono::Duration::minutes(30));
        let session = store.create(sheet).unwrap();
        let backend = UploadBackend::new(session, &ColumnDetector::new().unwrap());

        let provider = Arc::new(ScriptedProvider::new());
        provider.push_tool_calls(vec![call(
            "call_1",
            "query_collection",
            json!({
                "collection": UPLOAD_COLLECTION,
                "filters": { "orderBy": "amount", "orderDirection": "desc" }
            }),
        )]);
        provider.push_text("Based on rows 1-3, income outweighs spending.");

        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let mut agent = AgentConfig::new(
            "upload-analyst",
            "user-1",
            [UPLOAD_COLLECTION].into_iter().collect::<CollectionSet>(),
        );
        agent.cost.pre_screening = false;
        let user = user();

        let mut req = request(&agent, &user, "Summarize the data in my sheet", &backend);
        req.upload = Some(crate::UploadContext {
            row_count: 3,
            fields: vec!["date".into(), "amount".into(), "category".into()],
        });
        let response = engine.run_turn(req, CancellationToken::new()).await.unwrap();

        assert_eq!(response.sources.unwrap().row_indices, vec![1, 2, 3]);
        let system = provider.calls()[0].request.system_prompt().unwrap().to_string();
        assert!(system.contains("Your data has 3 rows"));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_before_any_work() {
        let provider = Arc::new(ScriptedProvider::new());
        let audit = InMemoryAuditLog::new();
        let config = EngineConfig::from_toml_str("[rate_limit]\nrequests = 2\nwindow_secs = 60").unwrap();
        let engine = engine_with(config, provider.clone(), &audit);
        let agent = finance_agent();
        let backend = DemoBackend::generate();
        let user = user();

        for _ in 0..2 {
            engine
                .run_turn(request(&agent, &user, "hi", &backend), CancellationToken::new())
                .await
                .unwrap();
        }
        let err = engine
            .run_turn(request(&agent, &user, "hi", &backend), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, QuarryError::RateLimited { .. }));
        assert_eq!(engine.analytics().stats(&agent.id).turns, 2);
    }

    #[tokio::test]
    async fn test_slow_provider_hits_turn_timeout() {
        let audit = InMemoryAuditLog::new();
        let config = EngineConfig::from_toml_str("turn_timeout_secs = 1").unwrap();
        let engine = engine_with(config, Arc::new(StalledProvider), &audit);
        let agent = finance_agent();
        let backend = DemoBackend::generate();
        let user = user();

        let err = engine
            .run_turn(
                request(&agent, &user, "Show the latest transactions", &backend),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QuarryError::Timeout { secs: 1 }));
        assert_eq!(engine.analytics().stats(&agent.id).turns, 0);
    }

    #[tokio::test]
    async fn test_cancelled_turn_makes_no_model_call() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("never sent");
        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let agent = finance_agent();
        let backend = DemoBackend::generate();
        let user = user();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .run_turn(request(&agent, &user, "Show the latest transactions", &backend), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, QuarryError::Cancelled));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_model_answer_gets_fallback_text() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("   ");
        let audit = InMemoryAuditLog::new();
        let engine = engine_with(EngineConfig::default(), provider.clone(), &audit);
        let agent = finance_agent();
        let backend = DemoBackend::generate();
        let user = user();

        let response = engine
            .run_turn(
                request(&agent, &user, "Show the latest transactions", &backend),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.response, crate::NO_RESPONSE);
        assert!(response.sources.is_none());
    }
}
