//! Query plan types.
//!
//! A plan is a DAG of tool invocations built ahead of execution. Steps refer
//! to earlier results through `DataArg::FromSteps`, never through string
//! placeholders, and the generator only ever points a step at steps listed
//! before it.

use serde::{Deserialize, Serialize};

use crate::tool::{ToolName, ToolRequest};

/// Identifier of a step within one plan, e.g. `query_finance_transactions_trend`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryStep {
    pub id: StepId,
    pub request: ToolRequest,
    /// Steps whose results must exist before this one runs.
    pub depends_on: Vec<StepId>,
    pub description: String,
}

impl QueryStep {
    pub fn tool(&self) -> ToolName {
        self.request.tool()
    }
}

impl Serialize for QueryStep {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("QueryStep", 5)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("tool", self.tool().as_str())?;
        s.serialize_field("args", &self.request.arguments())?;
        s.serialize_field("dependsOn", &self.depends_on)?;
        s.serialize_field("description", &self.description)?;
        s.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// Classify by step count: more than two steps is complex, two is moderate.
    pub fn from_step_count(steps: usize) -> Self {
        match steps {
            0 | 1 => Self::Simple,
            2 => Self::Moderate,
            _ => Self::Complex,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub steps: Vec<QueryStep>,
    /// Rough wall-clock estimate, two seconds per step.
    pub estimated_time_secs: u64,
    pub complexity: Complexity,
}

impl QueryPlan {
    pub const SECS_PER_STEP: u64 = 2;

    /// Wrap `steps`, deriving the time estimate and complexity.
    pub fn from_steps(steps: Vec<QueryStep>) -> Self {
        let n = steps.len();
        Self {
            steps,
            estimated_time_secs: n as u64 * Self::SECS_PER_STEP,
            complexity: Complexity::from_step_count(n),
        }
    }

    pub fn step(&self, id: &StepId) -> Option<&QueryStep> {
        self.steps.iter().find(|s| &s.id == id)
    }
}
