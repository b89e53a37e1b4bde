//! Argument verification report types.
//!
//! Before a tool call is authorized or dispatched, its arguments are checked
//! against the tool's declared JSON-Schema parameters and any registered
//! semantic rules. Only a passing report lets the call proceed.

use serde::{Deserialize, Serialize};

/// The result of verifying one set of tool arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True only if every check passed.
    pub passed: bool,
    /// Empty on pass.
    pub failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }

    pub fn from_failures(failures: Vec<VerificationFailure>) -> Self {
        Self {
            passed: failures.is_empty(),
            failures,
        }
    }

    /// All failure messages joined into one line for the model.
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.rule_id, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationFailure {
    /// `"schema"` for structural failures, otherwise the semantic rule id.
    pub rule_id: String,
    pub message: String,
}
