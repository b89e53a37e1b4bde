//! Quarry Data Agent — Demo CLI
//!
//! Answers questions against the built-in demo ledger or an uploaded CSV or
//! Excel file, using the real engine (screening, planner, policy, audit,
//! tool loop).
//! Without `--live` the model is a scripted stand-in, so no API key is
//! needed.
//!
//! Usage:
//!   cargo run -p demo -- ask "What's our burn rate this month?"
//!   cargo run -p demo -- ask --live --agents agents.toml --agent finance-analyst "..."
//!   cargo run -p demo -- upload january.csv "Which category costs the most?"
//!   cargo run -p demo -- plan "Total spend grouped by vendor over the last 3 months"
//!   cargo run -p demo -- screen "What is the capital of France today?"

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quarry_audit::InMemoryAuditLog;
use quarry_backends::{
    parse_upload, ColumnDetector, DemoBackend, IngestLimits, UploadBackend, UploadSessionStore, DEMO_COLLECTION,
    UPLOAD_COLLECTION,
};
use quarry_contracts::{
    agent::{AgentConfig, UserId},
    collection::CollectionSet,
    error::{QuarryError, QuarryResult},
    execution::TurnResponse,
    message::{ChatRequest, ChatResponse, Role},
    tool::ToolCall,
};
use quarry_core::traits::DataBackend;
use quarry_engine::{
    format_currency, generate_query_plan, needs_multi_step_planning, smart_engage, Currency, Engine, EngineConfig,
    TurnRequest, UploadContext,
};
use quarry_policy::AgentRegistry;
use quarry_provider::{HttpProviderClient, ProviderClient, ProviderSettings, ScriptedProvider};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Quarry — conversational analytics over your business data.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Quarry data agent demo",
    long_about = "Runs Quarry turns showing screening, query planning, policy-bound\n\
                  tool execution, and the hash-chained audit log."
)]
struct Cli {
    /// Engine configuration TOML. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Call the configured provider instead of the scripted stand-in.
    #[arg(long)]
    live: bool,

    /// Agents TOML to load the agent from.
    #[arg(long, requires = "agent")]
    agents: Option<PathBuf>,

    /// Agent id within `--agents`.
    #[arg(long)]
    agent: Option<String>,

    /// Run the query planner before the model loop.
    #[arg(long)]
    plan: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question about the demo finance ledger.
    Ask {
        question: String,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Ask a question about an uploaded CSV or Excel file.
    Upload {
        file: PathBuf,
        question: String,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Print the query plan generated for a question.
    Plan { question: String },
    /// Show how the cost optimizer screens a message.
    Screen { message: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize structured logging.  Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::Ask { question, model } => run_ask(cli.config, &question, &model).await,
        Command::Upload { file, question, model } => run_upload(cli.config, &file, &question, &model).await,
        Command::Plan { question } => run_plan(&question),
        Command::Screen { message } => run_screen(&message).await,
    };

    if let Err(e) = result {
        eprintln!("Demo error: {}", e);
        std::process::exit(1);
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn run_ask(config: Option<PathBuf>, question: &str, args: &ModelArgs) -> QuarryResult<()> {
    let agent = load_agent(args, &[DEMO_COLLECTION])?;
    let backend = DemoBackend::generate();
    info!(rows = backend.dataset().len(), "demo ledger generated");
    run_turn(config, &agent, question, &backend, None, args).await
}

async fn run_upload(config: Option<PathBuf>, file: &PathBuf, question: &str, args: &ModelArgs) -> QuarryResult<()> {
    let bytes = std::fs::read(file).map_err(|e| QuarryError::UploadRejected {
        reason: format!("failed to read '{}': {}", file.display(), e),
    })?;
    let filename = file.file_name().and_then(|n| n.to_str()).unwrap_or("upload.csv");
    let sheet = parse_upload(&bytes, filename, &IngestLimits::default())?;
    let upload = UploadContext {
        row_count: sheet.row_count(),
        fields: sheet.fields.clone(),
    };

    let store = UploadSessionStore::new(chrono::Duration::minutes(30));
    let session = store.create(sheet)?;
    println!("Upload session {} ({} rows)", session.session_id, upload.row_count);

    let backend = UploadBackend::new(session, &ColumnDetector::new()?);
    let agent = load_agent(args, &[UPLOAD_COLLECTION])?;
    run_turn(config, &agent, question, &backend, Some(upload), args).await
}

fn run_plan(question: &str) -> QuarryResult<()> {
    let collections: CollectionSet = [DEMO_COLLECTION, "sales_deals", "hr_employees"].into_iter().collect();
    println!("Multi-step planning needed: {}", needs_multi_step_planning(question));
    let plan = generate_query_plan(question, &collections, Utc::now().date_naive());
    let rendered = serde_json::to_string_pretty(&plan).map_err(|e| QuarryError::InvalidRequest {
        reason: format!("failed to render plan: {}", e),
    })?;
    println!("{}", rendered);
    Ok(())
}

async fn run_screen(message: &str) -> QuarryResult<()> {
    let collections: CollectionSet = [DEMO_COLLECTION].into_iter().collect();
    let screening = smart_engage(message, &collections, &[], None).await;
    println!("Full model: {}", screening.use_full_model);
    println!("Reason:     {}", screening.reason);
    if let Some(response) = screening.response {
        println!("Response:   {}", response);
    }
    Ok(())
}

// ── Turn wiring ───────────────────────────────────────────────────────────────

async fn run_turn(
    config: Option<PathBuf>,
    agent: &AgentConfig,
    question: &str,
    backend: &dyn DataBackend,
    upload: Option<UploadContext>,
    args: &ModelArgs,
) -> QuarryResult<()> {
    let config = match config {
        Some(path) => EngineConfig::from_file(&path)?,
        None => EngineConfig::default(),
    };
    let provider: Arc<dyn ProviderClient> = if args.live {
        Arc::new(HttpProviderClient::new(ProviderSettings::from_env())?)
    } else {
        let collection = backend.implicit_collection().unwrap_or(DEMO_COLLECTION).to_string();
        Arc::new(ScriptedProvider::from_fn(move |req| scripted_analyst(&collection, req)))
    };

    let mut agent = agent.clone();
    if !args.live {
        // The stand-in cannot classify, so skip straight to the tool loop.
        agent.cost.pre_screening = false;
    }
    agent.cost.query_planning |= args.plan;

    let audit = InMemoryAuditLog::new();
    let engine = Engine::standard(config, provider, audit.clone())?;
    let user = UserId(agent.owner.0.clone());

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    println!("Q: {}", question);
    let response = engine
        .run_turn(
            TurnRequest {
                agent: &agent,
                user_id: &user,
                message: question,
                history: &[],
                backend,
                upload,
                forwarded_for: None,
            },
            cancel,
        )
        .await
        .map_err(|e| {
            eprintln!("{}", e.user_message());
            e
        })?;

    print_response(&response);

    let entries = audit.entries_for_turn(&response.turn_id);
    println!();
    println!("Audit: {} entries, chain intact: {}", entries.len(), audit.verify_integrity());
    for entry in &entries {
        println!(
            "  [{}] {} {} {}",
            if entry.allowed { "ALLOW" } else { "DENY " },
            entry.tool,
            entry.collection.as_deref().unwrap_or("-"),
            entry.tool_call_id.as_deref().unwrap_or("planned"),
        );
    }
    Ok(())
}

fn load_agent(args: &ModelArgs, default_collections: &[&str]) -> QuarryResult<AgentConfig> {
    match (&args.agents, &args.agent) {
        (Some(path), Some(id)) => {
            let registry = AgentRegistry::from_file(path)?;
            registry.get(id).cloned().ok_or_else(|| QuarryError::ConfigError {
                reason: format!("agent '{}' not found in '{}'", id, path.display()),
            })
        }
        _ => Ok(AgentConfig::new(
            "demo-analyst",
            "demo-user",
            default_collections.iter().copied().collect(),
        )),
    }
}

/// A stand-in model: query, then compute statistics, then summarize them.
fn scripted_analyst(collection: &str, req: &ChatRequest) -> QuarryResult<ChatResponse> {
    let tool_results: Vec<&str> = req
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();

    if req.tools.is_some() {
        let next = match tool_results.len() {
            0 => Some(ToolCall::new(
                "call_query",
                "query_collection",
                json!({ "collection": collection, "filters": { "limit": 100 } }).to_string(),
            )),
            1 => Some(ToolCall::new(
                "call_stats",
                "analyze_data",
                json!({ "collection": collection, "analysisType": "statistics" }).to_string(),
            )),
            _ => None,
        };
        if let Some(call) = next {
            return Ok(ChatResponse {
                content: String::new(),
                tool_calls: Some(vec![call]),
            });
        }
    }

    let stats: Value = tool_results
        .last()
        .and_then(|content| serde_json::from_str(content).ok())
        .unwrap_or(Value::Null);
    let Some(sum) = stats["sum"].as_f64() else {
        return Ok(ChatResponse::text("I couldn't compute totals for that question."));
    };
    Ok(ChatResponse::text(format!(
        "Across {} records the net total is {}, or {} per record on average.",
        stats["count"].as_u64().unwrap_or(0),
        format_currency(sum, Currency::Usd),
        format_currency(stats["average"].as_f64().unwrap_or(0.0), Currency::Usd),
    )))
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_response(response: &TurnResponse) {
    println!("A: {}", response.response);
    println!();
    println!(
        "Engagement: {:?} ({}), model calls: {}, tool calls: {}",
        response.engagement, response.engagement_reason, response.model_calls, response.tool_calls
    );
    if let Some(sources) = &response.sources {
        println!("Sources: rows {:?}", sources.row_indices);
    }
    for insight in &response.insights {
        println!("Insight [{:?}] {}: {}", insight.kind, insight.title, insight.description);
    }
    for question in &response.follow_up_questions {
        println!("Follow-up: {}", question);
    }
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Quarry — Conversational Data Agent");
    println!("==================================");
    println!();
    println!("Per turn:");
    println!("  [1] Rate limit, then the cost optimizer may answer without the full model");
    println!("  [2] Optional query plan runs dependency-ordered tool steps");
    println!("  [3] Model ⇄ tool loop, every call verified, authorized, and audited");
    println!("  [4] Sources, insights, and follow-up questions attached to the answer");
    println!();
}
