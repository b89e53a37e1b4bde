//! `analyze_data`: statistics, monthly trend, and group breakdowns.
//!
//! Pure functions over already-selected rows. The same input always yields
//! the same output, and bad input is a `ToolResult::Error`, never a panic.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use quarry_contracts::tool::{
    AnalysisType, GroupTotal, PeriodTotal, Row, Statistics, ToolError, ToolResult,
};

use crate::filter::{cell_text, FieldMap};

/// Default field for `group` when the caller does not name one.
pub const DEFAULT_GROUP_BY: &str = "category";

/// Run `analysis_type` over `rows`.
///
/// `metric` overrides the numeric field; `group_by` overrides the grouping
/// field for `group`.
pub fn analyze(
    rows: &[Row],
    analysis_type: AnalysisType,
    group_by: Option<&str>,
    metric: Option<&str>,
    fields: &FieldMap,
) -> ToolResult {
    if rows.is_empty() {
        return ToolError::NoData.into();
    }

    match analysis_type {
        AnalysisType::Statistics => match statistics(rows, metric, fields) {
            Some(stats) => ToolResult::Statistics(stats),
            None => ToolError::NoNumericData.into(),
        },
        AnalysisType::Trend => ToolResult::Trend(trend(rows, metric, fields)),
        AnalysisType::Group => {
            let key = group_by.unwrap_or(DEFAULT_GROUP_BY);
            ToolResult::Group {
                group_by: key.to_string(),
                groups: group(rows, key, metric, fields),
            }
        }
    }
}

/// Count, sum, mean, min, and max of the numeric cells. `None` when no cell
/// is numeric.
pub fn statistics(rows: &[Row], metric: Option<&str>, fields: &FieldMap) -> Option<Statistics> {
    let amounts: Vec<f64> = rows
        .iter()
        .filter_map(|row| fields.amount_of(row, metric))
        .collect();
    if amounts.is_empty() {
        return None;
    }

    let sum: f64 = amounts.iter().sum();
    let min = amounts.iter().copied().fold(f64::INFINITY, f64::min);
    let max = amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(Statistics {
        count: amounts.len(),
        sum,
        average: sum / amounts.len() as f64,
        min,
        max,
    })
}

/// Bucket rows by the `YYYY-MM` prefix of their date, ascending by period.
///
/// Totals are sums of absolute amounts, so income and spend both count
/// toward activity. Rows without a date land in the `""` bucket.
pub fn trend(rows: &[Row], metric: Option<&str>, fields: &FieldMap) -> Vec<PeriodTotal> {
    let mut periods: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for row in rows {
        let period: String = fields.date_text(row).unwrap_or("").chars().take(7).collect();
        let slot = periods.entry(period).or_insert((0, 0.0));
        slot.0 += 1;
        slot.1 += fields.amount_of(row, metric).unwrap_or(0.0).abs();
    }

    periods
        .into_iter()
        .map(|(period, (count, total))| PeriodTotal { period, count, total })
        .collect()
}

/// Bucket rows by the text of `key`, in first-seen order. Missing or null
/// cells group under `"unknown"`.
pub fn group(rows: &[Row], key: &str, metric: Option<&str>, fields: &FieldMap) -> Vec<GroupTotal> {
    let mut groups: Vec<GroupTotal> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let name = match row.get(key) {
            None | Some(Value::Null) => "unknown".to_string(),
            Some(value) => cell_text(value),
        };
        let slot = *index.entry(name.clone()).or_insert_with(|| {
            groups.push(GroupTotal {
                name,
                count: 0,
                total: 0.0,
            });
            groups.len() - 1
        });
        groups[slot].count += 1;
        groups[slot].total += fields.amount_of(row, metric).unwrap_or(0.0).abs();
    }

    groups
}

// ── Tests ─────────────────────────────────────────────────────────────────────
