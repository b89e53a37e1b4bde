//! Shared `query_collection` filter and sort semantics.
//!
//! Every backend funnels its native rows through [`apply_filters`], so a
//! given set of filters selects the same rows whichever backend is active.
//! Only the [`FieldMap`] differs: it names the columns that play the date,
//! amount, and category roles in a particular collection.

use std::cmp::Ordering;

use serde_json::Value;

use quarry_contracts::tool::{parse_timestamp, OrderDirection, QueryFilters, Row};

/// Fallback date column when a row lacks its mapped date field.
const CREATED_AT: &str = "createdAt";

/// Which columns carry the date, amount, and category of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    pub date: String,
    pub amount: String,
    pub category: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self::new("date", "amount", "category")
    }
}

impl FieldMap {
    pub fn new(date: impl Into<String>, amount: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            amount: amount.into(),
            category: category.into(),
        }
    }

    /// The row's timestamp: the mapped date field, then `date`, then `createdAt`.
    pub fn date_text<'r>(&self, row: &'r Row) -> Option<&'r str> {
        [self.date.as_str(), "date", CREATED_AT]
            .into_iter()
            .find_map(|key| row.get(key).and_then(Value::as_str))
    }

    /// The row's numeric amount: `metric` (or the mapped amount field), then
    /// `amount`, then `value`. Non-numeric cells count as missing.
    pub fn amount_of(&self, row: &Row, metric: Option<&str>) -> Option<f64> {
        let primary = metric.unwrap_or(self.amount.as_str());
        [primary, "amount", "value"]
            .into_iter()
            .find_map(|key| row.get(key).filter(|v| !v.is_null()))
            .and_then(Value::as_f64)
    }
}

/// Apply `filters` to `rows` and return at most `limit` of them, sorted by
/// `orderBy`/`orderDirection` (defaults: `date`, `desc`).
///
/// The sort is stable: rows that compare equal keep their input order in
/// both directions.
pub fn apply_filters(rows: &[Row], filters: &QueryFilters, fields: &FieldMap) -> Vec<Row> {
    let bounds = filters.date_range.as_ref().map(|range| range.bounds());

    let mut selected: Vec<&Row> = rows
        .iter()
        .filter(|row| match bounds {
            None => true,
            // An unparseable range selects nothing.
            Some(None) => false,
            Some(Some((start, end))) => fields
                .date_text(row)
                .and_then(parse_timestamp)
                .is_some_and(|t| t >= start && t <= end),
        })
        .filter(|row| matches_text(row, &fields.category, filters.category.as_deref()))
        .filter(|row| matches_text(row, "status", filters.status.as_deref()))
        .filter(|row| matches_text(row, "department", filters.department.as_deref()))
        .filter(|row| match filters.min_amount {
            None => true,
            Some(min) => fields.amount_of(row, None).is_some_and(|a| a >= min),
        })
        .filter(|row| match filters.max_amount {
            None => true,
            Some(max) => fields.amount_of(row, None).is_some_and(|a| a <= max),
        })
        .collect();

    let order_by = filters.order_by.as_deref().unwrap_or(fields.date.as_str());
    let direction = filters.direction_or_default();
    selected.sort_by(|a, b| {
        let ordering = compare_cells(sort_key(a, order_by), sort_key(b, order_by));
        match direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        }
    });

    selected
        .into_iter()
        .take(filters.limit_or_default())
        .cloned()
        .collect()
}

/// Case-insensitive equality on a text column. `None` matches everything.
fn matches_text(row: &Row, field: &str, wanted: Option<&str>) -> bool {
    let Some(wanted) = wanted else {
        return true;
    };
    match row.get(field) {
        Some(value) => cell_text(value).to_lowercase() == wanted.to_lowercase(),
        None => false,
    }
}

fn sort_key<'r>(row: &'r Row, order_by: &str) -> Option<&'r Value> {
    row.get(order_by)
        .or_else(|| row.get(CREATED_AT))
        .filter(|v| !v.is_null())
}

/// Render a cell the way it reads in a sheet: strings bare, everything else
/// as JSON.
pub(crate) fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Order two cells. Missing sorts first; two numbers compare numerically;
/// anything else compares as text with digit runs read as numbers, so
/// `txn_2` sorts before `txn_10`.
fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(x), Some(y)) => natural_cmp(&cell_text(x), &cell_text(y)),
    }
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let run_a = take_digits(&mut left);
                let run_b = take_digits(&mut right);
                let (trim_a, trim_b) = (run_a.trim_start_matches('0'), run_b.trim_start_matches('0'));
                let ordering = trim_a
                    .len()
                    .cmp(&trim_b.len())
                    .then_with(|| trim_a.cmp(trim_b));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x.to_lowercase().cmp(y.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        run.push(c);
        chars.next();
    }
    run
}

// ── Tests ─────────────────────────────────────────────────────────────────────
