//! Tool vocabulary, typed tool arguments, and the `ToolResult` sum type.
//!
//! The model sees tools as JSON function descriptors and sends arguments as a
//! JSON-encoded string. Inside the runtime every call is parsed into a
//! `ToolRequest` and every outcome is a `ToolResult`, so backends and
//! consumers match exhaustively instead of poking at untyped JSON.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::plan::StepId;

/// One record returned by a backend. Field order is preserved.
pub type Row = Map<String, Value>;

/// The row field uploads use to carry their 1-based position in the sheet.
pub const ROW_INDEX_FIELD: &str = "_rowIndex";

// ── Tool names ───────────────────────────────────────────────────────────────

/// The fixed tool vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    QueryCollection,
    AnalyzeData,
    GetCollectionSchema,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [
        ToolName::QueryCollection,
        ToolName::AnalyzeData,
        ToolName::GetCollectionSchema,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueryCollection => "query_collection",
            Self::AnalyzeData => "analyze_data",
            Self::GetCollectionSchema => "get_collection_schema",
        }
    }

    /// Resolve a wire name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// The JSON function descriptor advertised to the model.
    pub fn definition(&self) -> ToolDefinition {
        let (description, parameters) = match self {
            Self::QueryCollection => (
                "Query a data collection with filters. Use this to fetch the records needed to \
                 answer the user's question. Filter by date range, category, status, department, \
                 or amount range, and always pick a sensible limit.",
                json!({
                    "type": "object",
                    "properties": {
                        "collection": {
                            "type": "string",
                            "description": "The collection to query"
                        },
                        "filters": {
                            "type": "object",
                            "description": "Filter criteria to narrow down results",
                            "properties": {
                                "dateRange": {
                                    "type": "object",
                                    "description": "Inclusive date range in ISO format (YYYY-MM-DD)",
                                    "properties": {
                                        "start": { "type": "string" },
                                        "end": { "type": "string" }
                                    },
                                    "required": ["start", "end"]
                                },
                                "category": { "type": "string" },
                                "status": { "type": "string" },
                                "department": { "type": "string" },
                                "minAmount": { "type": "number" },
                                "maxAmount": { "type": "number" },
                                "limit": {
                                    "type": "integer",
                                    "minimum": 1,
                                    "description": "Maximum number of records to return. Default: 50"
                                },
                                "orderBy": {
                                    "type": "string",
                                    "description": "Field to order by. Default: date"
                                },
                                "orderDirection": {
                                    "type": "string",
                                    "enum": ["asc", "desc"]
                                }
                            }
                        }
                    },
                    "required": ["collection"]
                }),
            ),
            Self::AnalyzeData => (
                "Analyze data for statistics, trends over time, or group breakdowns. Pass rows \
                 from a previous query_collection result, or name a collection to analyze it \
                 as a whole.",
                json!({
                    "type": "object",
                    "properties": {
                        "data": {
                            "type": "array",
                            "description": "Rows to analyze (from query_collection results)",
                            "items": { "type": "object" }
                        },
                        "collection": {
                            "type": "string",
                            "description": "Collection to analyze when data is omitted"
                        },
                        "analysisType": {
                            "type": "string",
                            "enum": ["statistics", "trend", "group"]
                        },
                        "groupBy": {
                            "type": "string",
                            "description": "Field to group by (default: category)"
                        },
                        "metric": {
                            "type": "string",
                            "description": "Numeric field to analyze (default: amount)"
                        }
                    },
                    "required": ["analysisType"]
                }),
            ),
            Self::GetCollectionSchema => (
                "Get the list of fields available in a collection. Use this before filtering \
                 when you are unsure which columns exist.",
                json!({
                    "type": "object",
                    "properties": {
                        "collection": {
                            "type": "string",
                            "description": "The collection to describe"
                        }
                    }
                }),
            ),
        };

        ToolDefinition::function(self.as_str(), description, parameters)
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptors for every tool in `ToolName::ALL` permitted by `allowed`.
///
/// `None` or an empty allow-list exposes all tools.
pub fn tool_definitions(allowed: Option<&BTreeSet<String>>) -> Vec<ToolDefinition> {
    ToolName::ALL
        .iter()
        .filter(|t| match allowed {
            Some(set) if !set.is_empty() => set.contains(t.as_str()),
            _ => true,
        })
        .map(ToolName::definition)
        .collect()
}

// ── Wire descriptors ─────────────────────────────────────────────────────────

/// A JSON function descriptor as sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema object describing the arguments.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is the raw JSON-encoded string exactly as the model sent it;
/// it is only trusted after parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

// ── Typed arguments ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    /// Inclusive bounds. A date-only `end` covers that whole day.
    ///
    /// `None` if either side is not a recognizable date.
    pub fn bounds(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = parse_timestamp(&self.start)?;
        let end = match NaiveDate::parse_from_str(self.end.trim(), "%Y-%m-%d") {
            Ok(day) => day.and_hms_milli_opt(23, 59, 59, 999)?,
            Err(_) => parse_timestamp(&self.end)?,
        };
        Some((start, end))
    }
}

/// Parse the date formats rows and filters use: `YYYY-MM-DD`, RFC 3339, or
/// `YYYY-MM-DDTHH:MM:SS` without an offset. Offsets are normalized to UTC.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return day.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

/// Filters accepted by `query_collection`. Every backend applies them with
/// identical semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_direction: Option<OrderDirection>,
}

impl QueryFilters {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const DEFAULT_ORDER_BY: &'static str = "date";

    pub fn limit_or_default(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    pub fn direction_or_default(&self) -> OrderDirection {
        self.order_direction.unwrap_or_default()
    }

    /// Names of the filters that are set, for log summaries.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.date_range.is_some() {
            keys.push("dateRange");
        }
        if self.category.is_some() {
            keys.push("category");
        }
        if self.status.is_some() {
            keys.push("status");
        }
        if self.department.is_some() {
            keys.push("department");
        }
        if self.min_amount.is_some() {
            keys.push("minAmount");
        }
        if self.max_amount.is_some() {
            keys.push("maxAmount");
        }
        if self.limit.is_some() {
            keys.push("limit");
        }
        if self.order_by.is_some() {
            keys.push("orderBy");
        }
        if self.order_direction.is_some() {
            keys.push("orderDirection");
        }
        keys
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    #[default]
    Statistics,
    Trend,
    Group,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Statistics => "statistics",
            Self::Trend => "trend",
            Self::Group => "group",
        }
    }
}

/// Where `analyze_data` gets its input rows.
///
/// `FromSteps` never arrives from the model: the query planner uses it to
/// refer to earlier plan steps, and the plan executor replaces it with
/// `Inline` before dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DataArg {
    /// Analyze the whole target collection.
    #[default]
    Absent,
    Inline(Vec<Row>),
    FromSteps(Vec<StepId>),
}

impl Serialize for DataArg {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Absent => serializer.serialize_none(),
            Self::Inline(rows) => rows.serialize(serializer),
            Self::FromSteps(ids) => json!({ "fromSteps": ids }).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DataArg {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Rows(Vec<Row>),
            Steps {
                #[serde(rename = "fromSteps")]
                from_steps: Vec<StepId>,
            },
        }

        match Option::<Wire>::deserialize(deserializer)? {
            None => Ok(Self::Absent),
            Some(Wire::Rows(rows)) => Ok(Self::Inline(rows)),
            Some(Wire::Steps { from_steps }) => Ok(Self::FromSteps(from_steps)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryArgs {
    pub collection: String,
    #[serde(default)]
    pub filters: QueryFilters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "DataArg::is_absent")]
    pub data: DataArg,
    pub analysis_type: AnalysisType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

impl DataArg {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

/// A parsed tool call: one variant per tool, each with typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    Query(QueryArgs),
    Analyze(AnalyzeArgs),
    Schema(SchemaArgs),
}

impl ToolRequest {
    /// Parse already-decoded JSON arguments for `tool`.
    pub fn parse(tool: ToolName, arguments: Value) -> Result<Self, serde_json::Error> {
        Ok(match tool {
            ToolName::QueryCollection => Self::Query(serde_json::from_value(arguments)?),
            ToolName::AnalyzeData => Self::Analyze(serde_json::from_value(arguments)?),
            ToolName::GetCollectionSchema => Self::Schema(serde_json::from_value(arguments)?),
        })
    }

    pub fn tool(&self) -> ToolName {
        match self {
            Self::Query(_) => ToolName::QueryCollection,
            Self::Analyze(_) => ToolName::AnalyzeData,
            Self::Schema(_) => ToolName::GetCollectionSchema,
        }
    }

    /// The collection named in the arguments, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            Self::Query(args) => Some(args.collection.as_str()),
            Self::Analyze(args) => args.collection.as_deref(),
            Self::Schema(args) => args.collection.as_deref(),
        }
    }

    /// The arguments re-encoded as the JSON object the model would send.
    pub fn arguments(&self) -> Value {
        let encoded = match self {
            Self::Query(args) => serde_json::to_value(args),
            Self::Analyze(args) => serde_json::to_value(args),
            Self::Schema(args) => serde_json::to_value(args),
        };
        encoded.unwrap_or(Value::Null)
    }

    /// Short description for logs: collection plus filter keys, never values.
    pub fn summary(&self) -> String {
        match self {
            Self::Query(args) => format!(
                "collection={} filters=[{}]",
                args.collection,
                args.filters.keys().join(",")
            ),
            Self::Analyze(args) => {
                let source = match &args.data {
                    DataArg::Absent => "collection".to_string(),
                    DataArg::Inline(rows) => format!("{} rows", rows.len()),
                    DataArg::FromSteps(ids) => format!("{} steps", ids.len()),
                };
                format!("type={} data={}", args.analysis_type.as_str(), source)
            }
            Self::Schema(args) => format!(
                "collection={}",
                args.collection.as_deref().unwrap_or("<implicit>")
            ),
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// A failure the model can recover from conversationally.
///
/// Rendered to the model as `{"error": "...", "code": "..."}`, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Tool not supported: {tool}")]
    UnsupportedTool { tool: String },

    #[error("Could not parse tool arguments: {reason}")]
    MalformedArguments { reason: String },

    #[error("Invalid tool arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("Access to collection '{collection}' is not allowed for this agent")]
    NotAllowed { collection: String },

    #[error("Tool '{tool}' is not enabled for this agent")]
    ToolNotPermitted { tool: String },

    #[error("No data to analyze")]
    NoData,

    #[error("No numeric data")]
    NoNumericData,

    #[error("Data backend error: {reason}")]
    Backend { reason: String },
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedTool { .. } => "unsupported_tool",
            Self::MalformedArguments { .. } => "malformed_arguments",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::NotAllowed { .. } => "not_allowed",
            Self::ToolNotPermitted { .. } => "tool_not_permitted",
            Self::NoData => "no_data",
            Self::NoNumericData => "no_numeric_data",
            Self::Backend { .. } => "backend_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub sum: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotal {
    /// `YYYY-MM` bucket key.
    pub period: String,
    pub count: usize,
    pub total: f64,
}

/// Whether the last period's total ended above the first one's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    /// Fewer than two periods.
    InsufficientData,
}

impl TrendDirection {
    /// Compare the last period total against the first. Ties read as
    /// decreasing.
    pub fn of(periods: &[PeriodTotal]) -> Self {
        match (periods.first(), periods.last()) {
            (Some(first), Some(last)) if periods.len() >= 2 => {
                if last.total > first.total {
                    Self::Increasing
                } else {
                    Self::Decreasing
                }
            }
            _ => Self::InsufficientData,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotal {
    pub name: String,
    pub count: usize,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub collection: String,
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// True when rows carry a `_rowIndex` the model can cite.
    #[serde(rename = "_rowIndices", skip_serializing_if = "std::ops::Not::not")]
    pub row_indices: bool,
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Rows(Vec<Row>),
    Statistics(Statistics),
    Trend(Vec<PeriodTotal>),
    Group {
        group_by: String,
        groups: Vec<GroupTotal>,
    },
    Schema(CollectionSchema),
    Error(ToolError),
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        Self::Error(err)
    }
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The JSON payload fed back to the model as the `tool` message content.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Rows(rows) => Value::Array(rows.iter().cloned().map(Value::Object).collect()),
            Self::Statistics(stats) => json!({
                "type": "statistics",
                "count": stats.count,
                "sum": stats.sum,
                "average": stats.average,
                "min": stats.min,
                "max": stats.max,
            }),
            Self::Trend(periods) => json!({
                "type": "trend",
                "periods": periods,
                "direction": TrendDirection::of(periods),
            }),
            Self::Group { group_by, groups } => json!({
                "type": "group",
                "groupBy": group_by,
                "groups": groups,
            }),
            Self::Schema(schema) => serde_json::to_value(schema).unwrap_or(Value::Null),
            Self::Error(err) => json!({ "error": err.to_string(), "code": err.code() }),
        }
    }

    /// Distinct `_rowIndex` values carried by returned rows.
    pub fn row_indices(&self) -> BTreeSet<u64> {
        match self {
            Self::Rows(rows) => rows
                .iter()
                .filter_map(|row| row.get(ROW_INDEX_FIELD).and_then(Value::as_u64))
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    /// The rows of a `Rows` result, if this is one.
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}
