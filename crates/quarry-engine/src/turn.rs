//! The chat turn state machine.
//!
//!   Rate limit → Screen ─(short-circuit)→ Done
//!                  │
//!                  └→ Plan? → Model call ⇄ Execute tools → Done
//!
//! A turn is bounded three ways: at most `max_tool_iterations` model calls
//! may request tools before one last call is made with no tools offered,
//! the whole turn runs under `turn_timeout_secs`, and the caller can cancel
//! it through a `CancellationToken`. Tool calls from one model response run
//! concurrently; a tool-call id seen earlier in the turn replays its cached
//! result instead of executing again.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quarry_contracts::{
    agent::{AgentConfig, TurnId, UserId},
    error::{QuarryError, QuarryResult},
    execution::{Engagement, Sources, TurnResponse},
    insight::Insight,
    message::{ChatMessage, ChatRequest, ChatResponse, ConversationMessage, Role, ToolChoice},
    plan::{QueryPlan, StepId},
    tool::{tool_definitions, Row, ToolCall, ToolError, ToolRequest, ToolResult},
};
use quarry_audit::InMemoryAuditLog;
use quarry_core::{
    traits::{ConversationSink, DataBackend},
    CallContext, ToolExecutor,
};
use quarry_policy::{rate_limit_key, AllowListPolicy, SlidingWindowLimiter};
use quarry_provider::ProviderClient;
use quarry_verify::ToolArgumentVerifier;

use crate::{
    analytics::AgentAnalytics,
    config::EngineConfig,
    insight::{generate_follow_up_questions, generate_insights, MAX_INSIGHTS},
    planner::{execute_query_plan, generate_query_plan, needs_multi_step_planning, StepRunner},
    prompt::{build_system_prompt, UploadContext},
    screen::{smart_engage, PreScreen},
};

pub const NO_RESPONSE: &str = "I could not generate a response.";

/// One inbound message and everything it is answered against.
pub struct TurnRequest<'a> {
    pub agent: &'a AgentConfig,
    pub user_id: &'a UserId,
    pub message: &'a str,
    /// The stored conversation so far, oldest first. When the engine has a
    /// conversation sink, the new exchange is appended there after the turn;
    /// otherwise persisting it is the caller's job.
    pub history: &'a [ConversationMessage],
    pub backend: &'a dyn DataBackend,
    /// Set for upload sessions so the prompt can describe the sheet.
    pub upload: Option<UploadContext>,
    /// Raw `X-Forwarded-For`, used for the rate-limit key when there is no
    /// signed-in user.
    pub forwarded_for: Option<&'a str>,
}

/// Runs turns. One per process, shared by every request.
pub struct Engine {
    config: EngineConfig,
    provider: Arc<dyn ProviderClient>,
    executor: Arc<ToolExecutor>,
    limiter: SlidingWindowLimiter,
    analytics: AgentAnalytics,
    conversations: Option<Arc<dyn ConversationSink>>,
}

/// Mutable bookkeeping for one turn.
#[derive(Default)]
struct TurnState {
    messages: Vec<ChatMessage>,
    model_calls: u32,
    tool_calls: u32,
    denied: u64,
    row_indices: BTreeSet<u64>,
    /// Rows returned by successful queries, grouped by collection in the
    /// order collections were first read.
    fetched: Vec<(String, Vec<Row>)>,
    /// Results by tool-call id, for replaying duplicate ids.
    executed: HashMap<String, ToolResult>,
}

impl TurnState {
    fn absorb(&mut self, collection: Option<&str>, result: &ToolResult) {
        self.row_indices.extend(result.row_indices());
        if matches!(
            result,
            ToolResult::Error(ToolError::NotAllowed { .. } | ToolError::ToolNotPermitted { .. })
        ) {
            self.denied += 1;
        }
        if let (Some(collection), Some(rows)) = (collection, result.rows()) {
            match self.fetched.iter_mut().find(|(name, _)| name == collection) {
                Some((_, existing)) => existing.extend(rows.iter().cloned()),
                None => self.fetched.push((collection.to_string(), rows.to_vec())),
            }
        }
    }

    fn insights(&self) -> Vec<Insight> {
        let mut insights: Vec<Insight> = self
            .fetched
            .iter()
            .flat_map(|(collection, rows)| generate_insights(rows, collection))
            .collect();
        insights.truncate(MAX_INSIGHTS);
        insights
    }

    fn sources(&self) -> Option<Sources> {
        (!self.row_indices.is_empty()).then(|| Sources {
            row_indices: self.row_indices.iter().copied().collect(),
        })
    }
}

/// The collection a model tool call reads, from its raw arguments.
fn call_collection(call: &ToolCall, backend: &dyn DataBackend) -> Option<String> {
    serde_json::from_str::<Value>(&call.arguments)
        .ok()
        .and_then(|args| args.get("collection").and_then(Value::as_str).map(str::to_string))
        .or_else(|| backend.implicit_collection().map(str::to_string))
}

/// Only user and assistant messages carry over between turns.
fn history_messages(history: &[ConversationMessage], window: usize) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .filter_map(|m| match m.role {
            Role::User => Some(ChatMessage::user(m.content.clone())),
            Role::Assistant => Some(ChatMessage::assistant(m.content.clone())),
            Role::System | Role::Tool => None,
        })
        .collect()
}

/// Runs plan steps through the audited executor.
struct AuditedStepRunner<'a> {
    executor: &'a ToolExecutor,
    ctx: CallContext<'a>,
}

#[async_trait]
impl<'a> StepRunner for AuditedStepRunner<'a> {
    async fn run_step(&self, _step: &StepId, request: &ToolRequest) -> QuarryResult<ToolResult> {
        self.executor.execute_request(&self.ctx, request).await
    }
}

impl Engine {
    pub fn new(config: EngineConfig, provider: Arc<dyn ProviderClient>, executor: Arc<ToolExecutor>) -> Self {
        let limiter = SlidingWindowLimiter::new(config.rate_limit);
        Self {
            config,
            provider,
            executor,
            limiter,
            analytics: AgentAnalytics::new(),
            conversations: None,
        }
    }

    /// Append each successful exchange to `sink`.
    pub fn with_conversation_sink(mut self, sink: Arc<dyn ConversationSink>) -> Self {
        self.conversations = Some(sink);
        self
    }

    /// The standard wiring: allow-list policy, schema verifier, and the
    /// given in-memory audit log.
    pub fn standard(config: EngineConfig, provider: Arc<dyn ProviderClient>, audit: InMemoryAuditLog) -> QuarryResult<Self> {
        let executor = ToolExecutor::new(
            Arc::new(AllowListPolicy::new()),
            Arc::new(audit),
            Arc::new(ToolArgumentVerifier::new()?),
        );
        Ok(Self::new(config, provider, Arc::new(executor)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn analytics(&self) -> &AgentAnalytics {
        &self.analytics
    }

    /// Answer one message.
    ///
    /// Errors are turn-level failures: rate limiting, timeout, cancellation,
    /// provider and configuration errors, or an audit write failure. Every
    /// tool-level problem is handed back to the model instead.
    pub async fn run_turn(&self, request: TurnRequest<'_>, cancel: CancellationToken) -> QuarryResult<TurnResponse> {
        let key = rate_limit_key(Some(request.user_id.0.as_str()), request.forwarded_for);
        self.limiter.check(&key)?;

        let turn_id = TurnId::new();
        info!(
            turn_id = %turn_id,
            agent_id = %request.agent.id.0,
            backend = %request.backend.name(),
            "turn started"
        );

        let secs = self.config.turn_timeout_secs;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QuarryError::Cancelled),
            done = tokio::time::timeout(Duration::from_secs(secs), self.drive(&request, &turn_id)) => {
                done.unwrap_or(Err(QuarryError::Timeout { secs }))
            }
        };

        if let Err(e) = self.executor.finalize_turn(&turn_id) {
            warn!(turn_id = %turn_id, error = %e, "audit finalize failed");
        }

        match outcome {
            Ok((response, denied)) => {
                self.analytics.record_turn(&request.agent.id, &response, denied);
                info!(
                    turn_id = %turn_id,
                    engagement = ?response.engagement,
                    model_calls = response.model_calls,
                    tool_calls = response.tool_calls,
                    "turn finished"
                );
                self.persist_exchange(&request, &response).await;
                Ok(response)
            }
            Err(e) => {
                warn!(turn_id = %turn_id, error = %e, "turn failed");
                Err(e)
            }
        }
    }

    /// A failed append is logged; the answer still goes back to the caller.
    async fn persist_exchange(&self, request: &TurnRequest<'_>, response: &TurnResponse) {
        let Some(sink) = &self.conversations else {
            return;
        };
        let exchange = [
            ConversationMessage::now(Role::User, request.message),
            ConversationMessage::now(Role::Assistant, response.response.clone()),
        ];
        if let Err(e) = sink.append(&request.agent.id, request.user_id, &exchange).await {
            warn!(turn_id = %response.turn_id, error = %e, "conversation append failed");
        }
    }

    async fn drive(&self, request: &TurnRequest<'_>, turn_id: &TurnId) -> QuarryResult<(TurnResponse, u64)> {
        let agent = request.agent;
        let history = history_messages(request.history, self.config.history_window);

        // ── Screen ───────────────────────────────────────────────────────────
        let prescreen = agent.cost.pre_screening.then(|| PreScreen {
            client: self.provider.as_ref(),
            provider: self.config.prescreen_provider,
            model: &self.config.prescreen_model,
            api_key: (agent.model.provider == self.config.prescreen_provider)
                .then_some(agent.model.api_key.as_deref())
                .flatten(),
            confidence_threshold: self.config.prescreen_confidence_threshold,
        });
        let screening = smart_engage(request.message, &agent.collections, &history, prescreen.as_ref()).await;

        if !screening.use_full_model {
            debug!(turn_id = %turn_id, reason = %screening.reason, "answered by screening");
            let response = TurnResponse {
                turn_id: turn_id.to_string(),
                response: screening.response.unwrap_or_default(),
                sources: None,
                insights: Vec::new(),
                follow_up_questions: Vec::new(),
                engagement: Engagement::ShortCircuit,
                engagement_reason: screening.reason,
                model_calls: screening.model_calls,
                tool_calls: 0,
            };
            return Ok((response, 0));
        }

        let ctx = CallContext {
            agent,
            user_id: request.user_id,
            turn_id,
            backend: request.backend,
        };

        let mut state = TurnState {
            model_calls: screening.model_calls,
            ..TurnState::default()
        };
        state
            .messages
            .push(ChatMessage::system(build_system_prompt(agent, request.upload.as_ref())));
        state.messages.extend(history);
        state.messages.push(ChatMessage::user(request.message));

        // ── Plan ─────────────────────────────────────────────────────────────
        if agent.cost.query_planning && needs_multi_step_planning(request.message) {
            self.run_plan(&ctx, request.message, &mut state).await?;
        }

        // ── Model loop ───────────────────────────────────────────────────────
        let tools = tool_definitions(agent.allowed_tools.as_ref());
        let mut answer: Option<String> = None;

        for iteration in 0..self.config.max_tool_iterations {
            let mut chat = self.chat_request(&state.messages, &request.user_id.0);
            chat.tools = Some(tools.clone());
            chat.tool_choice = Some(ToolChoice::Auto);

            let response = self.call_model(agent, &chat, &mut state).await?;
            let calls = response.requested_calls().to_vec();
            if calls.is_empty() {
                answer = Some(response.content);
                break;
            }

            debug!(turn_id = %turn_id, iteration, calls = calls.len(), "model requested tools");
            state
                .messages
                .push(ChatMessage::assistant_with_calls(response.content, calls.clone()));
            self.execute_calls(&ctx, &calls, &mut state).await?;
        }

        let answer = match answer {
            Some(answer) => answer,
            None => {
                warn!(
                    turn_id = %turn_id,
                    max_iterations = self.config.max_tool_iterations,
                    "tool loop limit reached, asking for a final answer"
                );
                let chat = self.chat_request(&state.messages, &request.user_id.0);
                self.call_model(agent, &chat, &mut state).await?.content
            }
        };
        let answer = if answer.trim().is_empty() {
            NO_RESPONSE.to_string()
        } else {
            answer
        };

        let response = TurnResponse {
            turn_id: turn_id.to_string(),
            response: answer,
            sources: state.sources(),
            insights: state.insights(),
            follow_up_questions: generate_follow_up_questions(request.message, &agent.collections),
            engagement: Engagement::FullModel,
            engagement_reason: screening.reason,
            model_calls: state.model_calls,
            tool_calls: state.tool_calls,
        };
        Ok((response, state.denied))
    }

    fn chat_request(&self, messages: &[ChatMessage], user: &str) -> ChatRequest {
        let mut chat = ChatRequest::new(messages.to_vec());
        chat.temperature = Some(self.config.temperature);
        chat.max_tokens = Some(self.config.max_tokens);
        chat.user = (!user.is_empty()).then(|| user.to_string());
        chat
    }

    async fn call_model(
        &self,
        agent: &AgentConfig,
        chat: &ChatRequest,
        state: &mut TurnState,
    ) -> QuarryResult<ChatResponse> {
        state.model_calls += 1;
        self.provider
            .call(
                agent.model.provider,
                &agent.model.model,
                chat,
                agent.model.api_key.as_deref(),
            )
            .await
    }

    /// Execute one response's tool calls and append their results in the
    /// order the model asked for them.
    async fn execute_calls(&self, ctx: &CallContext<'_>, calls: &[ToolCall], state: &mut TurnState) -> QuarryResult<()> {
        let mut fresh: Vec<&ToolCall> = Vec::new();
        for call in calls {
            if state.executed.contains_key(&call.id) || fresh.iter().any(|c| c.id == call.id) {
                debug!(turn_id = %ctx.turn_id, tool_call_id = %call.id, "replaying duplicate tool call");
                continue;
            }
            fresh.push(call);
        }

        let outcomes = join_all(fresh.iter().map(|call| self.executor.execute_call(ctx, call))).await;
        for (call, outcome) in fresh.iter().zip(outcomes) {
            let result = outcome?;
            state.tool_calls += 1;
            state.absorb(call_collection(call, ctx.backend).as_deref(), &result);
            state.executed.insert(call.id.clone(), result);
        }

        for call in calls {
            let content = state
                .executed
                .get(&call.id)
                .map(ToolResult::to_wire)
                .unwrap_or(Value::Null);
            state.messages.push(ChatMessage::tool_result(call, content.to_string()));
        }
        Ok(())
    }

    /// Run the deterministic plan and hand its results to the model as if it
    /// had requested them itself.
    async fn run_plan(&self, ctx: &CallContext<'_>, message: &str, state: &mut TurnState) -> QuarryResult<()> {
        let plan = generate_query_plan(message, &ctx.agent.collections, Utc::now().date_naive());
        if plan.steps.is_empty() {
            return Ok(());
        }
        info!(
            turn_id = %ctx.turn_id,
            steps = plan.steps.len(),
            complexity = ?plan.complexity,
            "executing query plan"
        );

        let runner = AuditedStepRunner {
            executor: self.executor.as_ref(),
            ctx: *ctx,
        };
        let outcome = execute_query_plan(&plan, &runner).await?;

        let calls: Vec<ToolCall> = plan
            .steps
            .iter()
            .map(|step| {
                ToolCall::new(
                    format!("plan_{}", step.id),
                    step.tool().as_str(),
                    step.request.arguments().to_string(),
                )
            })
            .collect();
        state
            .messages
            .push(ChatMessage::assistant_with_calls(plan_summary(&plan), calls.clone()));

        for (call, step) in calls.iter().zip(&plan.steps) {
            let Some(result) = outcome.result(&step.id) else {
                continue;
            };
            state.tool_calls += 1;
            let collection = step
                .request
                .collection()
                .or_else(|| ctx.backend.implicit_collection());
            if matches!(step.request, ToolRequest::Query(_)) {
                state.absorb(collection, result);
            } else {
                state.absorb(None, result);
            }
            state.executed.insert(call.id.clone(), result.clone());
            state
                .messages
                .push(ChatMessage::tool_result(call, result.to_wire().to_string()));
        }
        Ok(())
    }
}

/// One line naming the planned steps. Assistant content is never empty.
fn plan_summary(plan: &QueryPlan) -> String {
    let steps: Vec<&str> = plan.steps.iter().map(|step| step.description.as_str()).collect();
    format!("Running a {}-step query plan: {}.", steps.len(), steps.join("; "))
}
