//! Schema-based tool argument verifier for the quarry runtime.
//!
//! `ToolArgumentVerifier` implements the `ArgumentVerifier` trait from
//! `quarry-core`. Verification runs in two phases:
//!
//! 1. **Structural**: the decoded arguments are validated against the
//!    JSON-Schema `parameters` of the tool's own descriptor, compiled once at
//!    construction.
//! 2. **Semantic**: every rule registered for the tool is evaluated in order.
//!    All failures are collected before returning so the model sees the full
//!    set in one pass.
//!
//! Two semantic rules are registered by default: `date-range-order` and
//! `amount-range-order` for `query_collection`.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use quarry_contracts::{
    error::{QuarryError, QuarryResult},
    tool::{DateRange, ToolName},
    verify::{VerificationFailure, VerificationReport},
};
use quarry_core::traits::ArgumentVerifier;

/// A caller-supplied verification function.
///
/// Receives the decoded arguments. Returns `Some(message)` when the check
/// fails, or `None` on success.
pub type ArgumentRuleFn = Box<dyn Fn(&Value) -> Option<String> + Send + Sync>;

struct NamedRule {
    rule_id: String,
    check: ArgumentRuleFn,
}

/// The quarry argument verifier.
pub struct ToolArgumentVerifier {
    validators: HashMap<ToolName, jsonschema::Validator>,
    rules: HashMap<ToolName, Vec<NamedRule>>,
}

impl ToolArgumentVerifier {
    /// Compile every tool's parameter schema and register the default rules.
    ///
    /// Returns `QuarryError::SchemaValidation` if a schema fails to compile.
    pub fn new() -> QuarryResult<Self> {
        let mut validators = HashMap::new();
        for tool in ToolName::ALL {
            let schema = tool.definition().function.parameters;
            let validator = jsonschema::validator_for(&schema).map_err(|e| QuarryError::SchemaValidation {
                reason: format!("parameters schema for '{}' does not compile: {}", tool, e),
            })?;
            validators.insert(tool, validator);
        }

        let mut verifier = Self {
            validators,
            rules: HashMap::new(),
        };
        verifier.register_rule(ToolName::QueryCollection, "date-range-order", Box::new(check_date_range));
        verifier.register_rule(ToolName::QueryCollection, "amount-range-order", Box::new(check_amount_range));
        Ok(verifier)
    }

    /// Register a semantic rule for `tool`.
    ///
    /// Rules run in registration order after structural validation passes.
    /// Registering an existing `rule_id` for the same tool replaces it.
    pub fn register_rule(&mut self, tool: ToolName, rule_id: impl Into<String>, check: ArgumentRuleFn) {
        let rule_id = rule_id.into();
        let rules = self.rules.entry(tool).or_default();
        match rules.iter_mut().find(|r| r.rule_id == rule_id) {
            Some(existing) => existing.check = check,
            None => rules.push(NamedRule { rule_id, check }),
        }
    }
}

impl ArgumentVerifier for ToolArgumentVerifier {
    fn verify(&self, tool: ToolName, arguments: &Value) -> QuarryResult<VerificationReport> {
        let mut failures: Vec<VerificationFailure> = Vec::new();

        // ── Phase 1: JSON Schema structural validation ────────────────────────
        let validator = self.validators.get(&tool).ok_or_else(|| QuarryError::SchemaValidation {
            reason: format!("no parameters schema compiled for '{}'", tool),
        })?;
        for error in validator.iter_errors(arguments) {
            let path = error.instance_path.to_string();
            let message = if path.is_empty() {
                error.to_string()
            } else {
                format!("{}: {}", path, error)
            };
            warn!(tool = %tool, %message, "tool argument schema violation");
            failures.push(VerificationFailure {
                rule_id: "schema".to_string(),
                message,
            });
        }

        // Semantic rules assume the structure is right.
        if !failures.is_empty() {
            return Ok(VerificationReport::from_failures(failures));
        }

        // ── Phase 2: Semantic rule evaluation ────────────────────────────────
        for rule in self.rules.get(&tool).into_iter().flatten() {
            if let Some(message) = (rule.check)(arguments) {
                warn!(tool = %tool, rule_id = %rule.rule_id, %message, "semantic argument rule failed");
                failures.push(VerificationFailure {
                    rule_id: rule.rule_id.clone(),
                    message,
                });
            }
        }

        debug!(tool = %tool, passed = failures.is_empty(), "argument verification complete");
        Ok(VerificationReport::from_failures(failures))
    }
}

// ── Default rules ─────────────────────────────────────────────────────────────

/// `filters.dateRange` must hold two parseable dates with start <= end.
fn check_date_range(arguments: &Value) -> Option<String> {
    let raw = arguments.pointer("/filters/dateRange")?;
    let range: DateRange = match serde_json::from_value(raw.clone()) {
        Ok(range) => range,
        Err(e) => return Some(format!("dateRange is malformed: {}", e)),
    };
    match range.bounds() {
        None => Some(format!(
            "dateRange bounds '{}'..'{}' are not ISO dates",
            range.start, range.end
        )),
        Some((start, end)) if start > end => Some(format!(
            "dateRange start {} is after end {}",
            range.start, range.end
        )),
        Some(_) => None,
    }
}

/// `filters.minAmount` must not exceed `filters.maxAmount`.
fn check_amount_range(arguments: &Value) -> Option<String> {
    let min = arguments.pointer("/filters/minAmount").and_then(Value::as_f64)?;
    let max = arguments.pointer("/filters/maxAmount").and_then(Value::as_f64)?;
    (min > max).then(|| format!("minAmount {} is greater than maxAmount {}", min, max))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
