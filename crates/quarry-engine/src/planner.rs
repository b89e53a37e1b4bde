//! The query planner: turns a multi-part question into an ordered set of
//! tool steps and executes them with each step computed at most once.
//!
//! Plans are built so that a step only ever depends on steps listed before
//! it. The executor still checks the graph and refuses cycles and dangling
//! references with `QuarryError::PlanCycle` rather than looping.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate};
use tracing::debug;

use quarry_contracts::{
    collection::CollectionSet,
    error::{QuarryError, QuarryResult},
    plan::{QueryPlan, QueryStep, StepId},
    tool::{
        AnalysisType, AnalyzeArgs, DataArg, DateRange, OrderDirection, QueryArgs, QueryFilters, Row,
        ToolRequest, ToolResult,
    },
};

/// Words that mark a question as needing more than one data fetch.
pub const COMPLEX_INDICATORS: &[&str] = &[
    "and", "also", "compare", "trend", "over time", "versus", "vs", "both", "multiple", "different",
    "various", "across", "between",
];

/// Words that ask for computation over fetched rows rather than the rows
/// themselves.
pub const ANALYSIS_INDICATORS: &[&str] = &[
    "trend", "analyze", "analysis", "pattern", "compare", "versus", "group", "breakdown", "break down",
    "total", "average",
];

const TREND_LIMIT: usize = 100;
const COMPARE_LIMIT: usize = 50;
const PRIMARY_LIMIT: usize = 50;

pub const PRIMARY_STEP: &str = "query_primary";
pub const ANALYZE_STEP: &str = "analyze_data";

/// True if `question` contains any complexity indicator.
pub fn needs_multi_step_planning(question: &str) -> bool {
    let lower = question.to_lowercase();
    COMPLEX_INDICATORS.iter().any(|i| lower.contains(i))
}

/// The date window named in `question`, ending `today`.
///
/// Recognizes "last month", "last year", and "last 3 months"; each starts on
/// the first day of a month.
pub fn time_window(question: &str, today: NaiveDate) -> Option<DateRange> {
    let lower = question.to_lowercase();
    let months_back = if lower.contains("last month") {
        1
    } else if lower.contains("last year") {
        12
    } else if lower.contains("last 3 months") {
        3
    } else {
        return None;
    };

    let start = today
        .with_day(1)?
        .checked_sub_months(Months::new(months_back))?;
    Some(DateRange {
        start: start.format("%Y-%m-%d").to_string(),
        end: today.format("%Y-%m-%d").to_string(),
    })
}

fn mentions(lower: &str, collection: &str) -> bool {
    lower.contains(&collection.replace('_', " ").to_lowercase())
}

/// The field after "by" in grouping language, e.g. `vendor` in
/// "spend grouped by vendor".
fn group_field(lower: &str) -> Option<String> {
    if !(lower.contains("group") || lower.contains("breakdown") || lower.contains("break down")) {
        return None;
    }
    let (_, after) = lower.split_once(" by ")?;
    let field: String = after
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!field.is_empty()).then_some(field)
}

fn query_step(id: String, collection: &str, filters: QueryFilters, description: String) -> QueryStep {
    QueryStep {
        id: StepId::new(id),
        request: ToolRequest::Query(QueryArgs {
            collection: collection.to_string(),
            filters,
        }),
        depends_on: Vec::new(),
        description,
    }
}

/// Build a plan for `question` over the agent's collections.
///
/// Never empty while at least one collection exists: if no rule produces a
/// query step, one step reads the first collection.
pub fn generate_query_plan(question: &str, collections: &CollectionSet, today: NaiveDate) -> QueryPlan {
    let lower = question.to_lowercase();
    let window = time_window(&lower, today);
    let mut steps: Vec<QueryStep> = Vec::new();

    // ── Trend over a recognized window ───────────────────────────────────
    let wants_trend = lower.contains("trend") || lower.contains("over time") || lower.contains("last");
    if let (true, Some(range)) = (wants_trend, &window) {
        for collection in collections.all() {
            if mentions(&lower, collection) || lower.contains("all") {
                let filters = QueryFilters {
                    date_range: Some(range.clone()),
                    limit: Some(TREND_LIMIT),
                    order_by: Some(QueryFilters::DEFAULT_ORDER_BY.to_string()),
                    order_direction: Some(OrderDirection::Asc),
                    ..QueryFilters::default()
                };
                steps.push(query_step(
                    format!("query_{}_trend", collection),
                    collection,
                    filters,
                    format!("Query {} data for trend analysis", collection),
                ));
            }
        }
    }

    // ── Comparison across mentioned collections ──────────────────────────
    if lower.contains("compare") || lower.contains("versus") || lower.contains("vs") {
        for collection in collections.all() {
            if mentions(&lower, collection) {
                let filters = QueryFilters {
                    limit: Some(COMPARE_LIMIT),
                    ..QueryFilters::default()
                };
                steps.push(query_step(
                    format!("query_{}_compare", collection),
                    collection,
                    filters,
                    format!("Query {} for comparison", collection),
                ));
            }
        }
    }

    // ── Fallback: the first collection ───────────────────────────────────
    if steps.is_empty() {
        if let Some(primary) = collections.first() {
            let filters = QueryFilters {
                date_range: window.clone(),
                limit: Some(PRIMARY_LIMIT),
                ..QueryFilters::default()
            };
            steps.push(query_step(
                PRIMARY_STEP.to_string(),
                primary,
                filters,
                format!("Query {} data", primary),
            ));
        }
    }

    // ── Analysis over every query step ───────────────────────────────────
    if !steps.is_empty() && ANALYSIS_INDICATORS.iter().any(|i| lower.contains(i)) {
        let depends_on: Vec<StepId> = steps.iter().map(|s| s.id.clone()).collect();

        let mut targets: Vec<&str> = steps.iter().filter_map(|s| s.request.collection()).collect();
        targets.dedup();
        let collection = match targets.as_slice() {
            [only] => Some(only.to_string()),
            _ => None,
        };

        let group_by = group_field(&lower);
        let analysis_type = if lower.contains("trend") || lower.contains("over time") {
            AnalysisType::Trend
        } else if group_by.is_some() {
            AnalysisType::Group
        } else {
            AnalysisType::Statistics
        };

        steps.push(QueryStep {
            id: StepId::new(ANALYZE_STEP),
            request: ToolRequest::Analyze(AnalyzeArgs {
                collection,
                data: DataArg::FromSteps(depends_on.clone()),
                analysis_type,
                group_by: group_by.filter(|_| analysis_type == AnalysisType::Group),
                metric: None,
            }),
            depends_on,
            description: "Analyze the queried data".to_string(),
        });
    }

    let plan = QueryPlan::from_steps(steps);
    debug!(
        steps = plan.steps.len(),
        complexity = ?plan.complexity,
        "query plan generated"
    );
    plan
}

// ── Execution ────────────────────────────────────────────────────────────────

/// Runs one resolved plan step. The engine routes this through the audited
/// tool executor.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, step: &StepId, request: &ToolRequest) -> QuarryResult<ToolResult>;
}

/// The result of every step, in plan order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub results: Vec<(StepId, ToolResult)>,
}

impl PlanOutcome {
    pub fn result(&self, id: &StepId) -> Option<&ToolResult> {
        self.results.iter().find(|(step, _)| step == id).map(|(_, r)| r)
    }
}

/// The order steps run in: list order, with each step's dependencies
/// placed before it and every step appearing once.
pub fn execution_order(plan: &QueryPlan) -> QuarryResult<Vec<usize>> {
    let mut index: HashMap<&StepId, usize> = HashMap::new();
    for (i, step) in plan.steps.iter().enumerate() {
        if index.insert(&step.id, i).is_some() {
            return Err(QuarryError::PlanCycle {
                reason: format!("duplicate step id '{}'", step.id),
            });
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    fn visit(
        i: usize,
        plan: &QueryPlan,
        index: &HashMap<&StepId, usize>,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) -> QuarryResult<()> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                return Err(QuarryError::PlanCycle {
                    reason: format!("step '{}' depends on itself", plan.steps[i].id),
                })
            }
            Mark::Unvisited => {}
        }
        marks[i] = Mark::Visiting;
        for dep in &plan.steps[i].depends_on {
            let Some(&j) = index.get(dep) else {
                return Err(QuarryError::PlanCycle {
                    reason: format!("step '{}' depends on unknown step '{}'", plan.steps[i].id, dep),
                });
            };
            visit(j, plan, index, marks, order)?;
        }
        marks[i] = Mark::Done;
        order.push(i);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; plan.steps.len()];
    let mut order = Vec::with_capacity(plan.steps.len());
    for i in 0..plan.steps.len() {
        visit(i, plan, &index, &mut marks, &mut order)?;
    }
    Ok(order)
}

/// Replace step references in `request` with the rows those steps returned.
fn resolve(request: &ToolRequest, done: &HashMap<StepId, ToolResult>) -> ToolRequest {
    match request {
        ToolRequest::Analyze(args) => match &args.data {
            DataArg::FromSteps(ids) => {
                let rows: Vec<Row> = ids
                    .iter()
                    .filter_map(|id| done.get(id))
                    .filter_map(ToolResult::rows)
                    .flat_map(|rows| rows.iter().cloned())
                    .collect();
                ToolRequest::Analyze(AnalyzeArgs {
                    data: DataArg::Inline(rows),
                    ..args.clone()
                })
            }
            _ => request.clone(),
        },
        _ => request.clone(),
    }
}

/// Execute `plan`, running each step exactly once.
///
/// A step referenced by several dependents is computed the first time it is
/// needed and its cached result reused afterwards.
pub async fn execute_query_plan(plan: &QueryPlan, runner: &dyn StepRunner) -> QuarryResult<PlanOutcome> {
    let order = execution_order(plan)?;
    let mut done: HashMap<StepId, ToolResult> = HashMap::with_capacity(order.len());

    for i in order {
        let step = &plan.steps[i];
        let request = resolve(&step.request, &done);
        debug!(step = %step.id, tool = %step.tool(), args = %request.summary(), "running plan step");
        let result = runner.run_step(&step.id, &request).await?;
        done.insert(step.id.clone(), result);
    }

    let results = plan
        .steps
        .iter()
        .filter_map(|step| done.remove(&step.id).map(|r| (step.id.clone(), r)))
        .collect();
    Ok(PlanOutcome { results })
}
