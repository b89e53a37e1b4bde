//! The zero-setup demo dataset and its backend.
//!
//! All data in this module is generated and fictional. Generation is seeded,
//! so the same `now` always yields the same 150 transactions.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::json;
use tracing::debug;

use quarry_contracts::{
    error::QuarryResult,
    tool::{AnalyzeArgs, CollectionSchema, DataArg, QueryFilters, Row, ToolError, ToolResult},
};
use quarry_core::traits::DataBackend;

use crate::{analysis, filter::{apply_filters, FieldMap}};

/// The single collection the demo represents.
pub const DEMO_COLLECTION: &str = "finance_transactions";

pub const TRANSACTION_COUNT: usize = 150;

const CATEGORIES: [&str; 8] = [
    "payroll",
    "rent",
    "software",
    "marketing",
    "sales",
    "utilities",
    "travel",
    "office-supplies",
];
const VENDORS: [&str; 8] = [
    "Microsoft",
    "AWS",
    "Salesforce",
    "HubSpot",
    "Slack",
    "Zoom",
    "Adobe",
    "Google Workspace",
];
const DEPARTMENTS: [&str; 5] = ["Engineering", "Sales", "Marketing", "Operations", "HR"];

const SCHEMA_FIELDS: [&str; 10] = [
    "id",
    "date",
    "amount",
    "currency",
    "type",
    "category",
    "description",
    "vendor",
    "department",
    "status",
];

// ── Generation ────────────────────────────────────────────────────────────────

/// Deterministic pseudo-random value in `[0, 1)`.
fn seeded_random(seed: usize) -> f64 {
    let x = (seed as f64).sin() * 10_000.0;
    x - x.floor()
}

fn pick<'a>(items: &[&'a str], seed: usize) -> &'a str {
    let idx = (seeded_random(seed) * items.len() as f64).floor() as usize;
    items[idx.min(items.len() - 1)]
}

/// A fixed ledger of transactions spread between 2024-01-01 and `now`.
#[derive(Debug, Clone)]
pub struct DemoDataset {
    rows: Vec<Row>,
}

impl DemoDataset {
    /// Generate the ledger, newest first.
    ///
    /// Every fifth transaction is income; the rest are expenses with a
    /// negative amount and a vendor.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .map(|d| d.timestamp_millis())
            .unwrap_or_default();
        let span = (now.timestamp_millis() - start).max(0) as f64;

        let mut dated: Vec<(i64, Row)> = (0..TRANSACTION_COUNT)
            .map(|i| {
                let millis = start + (seeded_random(i) * span) as i64;
                let date = DateTime::from_timestamp_millis(millis)
                    .unwrap_or(now)
                    .to_rfc3339_opts(SecondsFormat::Millis, true);
                let income = i % 5 == 0;
                let amount = if income {
                    (5_000.0 + seeded_random(i + 100) * 45_000.0).floor() as i64
                } else {
                    -((100.0 + seeded_random(i + 200) * 9_900.0).floor() as i64)
                };
                let category = pick(&CATEGORIES, i + 300);
                let department = pick(&DEPARTMENTS, i + 400);
                let vendor = pick(&VENDORS, i + 500);

                let mut row = json!({
                    "id": format!("txn_{}", i + 1),
                    "date": date,
                    "amount": amount,
                    "currency": "USD",
                    "type": if income { "income" } else { "expense" },
                    "category": category,
                    "description": format!("{} - {}", category, vendor),
                    "account": "checking",
                    "status": "cleared",
                    "department": department,
                    "projectCode": format!("PROJ-{}", 100 + (i % 900)),
                    "createdAt": date,
                    "updatedAt": date,
                });
                if !income {
                    row["vendor"] = json!(vendor);
                }
                (millis, row.as_object().cloned().unwrap_or_default())
            })
            .collect();

        dated.sort_by(|a, b| b.0.cmp(&a.0));
        Self {
            rows: dated.into_iter().map(|(_, row)| row).collect(),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

/// Serves the demo ledger as `finance_transactions`.
#[derive(Debug, Clone)]
pub struct DemoBackend {
    dataset: DemoDataset,
    fields: FieldMap,
}

impl DemoBackend {
    pub fn new(dataset: DemoDataset) -> Self {
        Self {
            dataset,
            fields: FieldMap::default(),
        }
    }

    /// Generate a fresh ledger ending now.
    pub fn generate() -> Self {
        Self::new(DemoDataset::generate(Utc::now()))
    }

    pub fn dataset(&self) -> &DemoDataset {
        &self.dataset
    }
}

#[async_trait]
impl DataBackend for DemoBackend {
    fn name(&self) -> &str {
        "demo"
    }

    fn implicit_collection(&self) -> Option<&str> {
        Some(DEMO_COLLECTION)
    }

    async fn query_collection(&self, collection: &str, filters: &QueryFilters) -> QuarryResult<Vec<Row>> {
        if collection != DEMO_COLLECTION {
            debug!(collection = %collection, "demo holds no such collection");
            return Ok(Vec::new());
        }
        Ok(apply_filters(self.dataset.rows(), filters, &self.fields))
    }

    async fn analyze_data(&self, _collection: Option<&str>, args: &AnalyzeArgs) -> QuarryResult<ToolResult> {
        let rows = match &args.data {
            DataArg::Absent => self.dataset.rows(),
            DataArg::Inline(rows) => rows.as_slice(),
            DataArg::FromSteps(_) => {
                return Ok(ToolError::InvalidArguments {
                    reason: "data references plan steps that were not resolved".to_string(),
                }
                .into())
            }
        };
        Ok(analysis::analyze(
            rows,
            args.analysis_type,
            args.group_by.as_deref(),
            args.metric.as_deref(),
            &self.fields,
        ))
    }

    async fn collection_schema(&self, collection: &str) -> QuarryResult<CollectionSchema> {
        Ok(CollectionSchema {
            collection: collection.to_string(),
            fields: SCHEMA_FIELDS.iter().map(|f| f.to_string()).collect(),
            row_count: Some(self.dataset.len()),
            row_indices: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{DemoDataset, TRANSACTION_COUNT};

    fn dataset() -> DemoDataset {
        DemoDataset::generate(Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = dataset();
        let b = dataset();
        assert_eq!(a.len(), TRANSACTION_COUNT);
        assert_eq!(a.rows(), b.rows());
    }

    #[test]
    fn test_rows_are_newest_first() {
        let data = dataset();
        let dates: Vec<&str> = data.rows().iter().map(|r| r["date"].as_str().unwrap()).collect();
        let mut sorted = dates.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(dates, sorted);
    }

    #[test]
    fn test_income_is_positive_and_expenses_carry_vendor() {
        for row in dataset().rows() {
            let amount = row["amount"].as_i64().unwrap();
            match row["type"].as_str().unwrap() {
                "income" => {
                    assert!((5_000..50_000).contains(&amount));
                    assert!(row.get("vendor").is_none());
                }
                _ => {
                    assert!((-10_000..=-100).contains(&amount));
                    assert!(row["vendor"].is_string());
                }
            }
        }
    }
}
