//! Column-role detection for uploaded sheets.
//!
//! Uploaded headers are arbitrary (and often not English), so the date,
//! amount, and category roles are found by case-insensitive pattern over the
//! header names of the first row.

use regex::{Regex, RegexBuilder};

use quarry_contracts::{
    error::{QuarryError, QuarryResult},
    tool::Row,
};

use crate::filter::FieldMap;

const DATE_PATTERN: &str = "date|tanggal|tgl";
const AMOUNT_PATTERN: &str = "amount|value|jumlah|nilai";
const CATEGORY_PATTERN: &str = "category|kategori|type|jenis";

/// Compiled header patterns.
#[derive(Debug, Clone)]
pub struct ColumnDetector {
    date: Regex,
    amount: Regex,
    category: Regex,
}

impl ColumnDetector {
    pub fn new() -> QuarryResult<Self> {
        Ok(Self {
            date: compile(DATE_PATTERN)?,
            amount: compile(AMOUNT_PATTERN)?,
            category: compile(CATEGORY_PATTERN)?,
        })
    }

    /// Map roles to the first matching header of `first_row`.
    ///
    /// An unmatched date role falls back to the first column; unmatched
    /// amount and category roles keep their conventional names.
    pub fn detect(&self, first_row: Option<&Row>) -> FieldMap {
        let Some(row) = first_row else {
            return FieldMap::default();
        };
        let find = |pattern: &Regex| row.keys().find(|k| pattern.is_match(k)).cloned();

        let date = find(&self.date)
            .or_else(|| row.keys().next().cloned())
            .unwrap_or_else(|| "date".to_string());
        let amount = find(&self.amount).unwrap_or_else(|| "amount".to_string());
        let category = find(&self.category).unwrap_or_else(|| "category".to_string());
        FieldMap::new(date, amount, category)
    }
}

fn compile(pattern: &str) -> QuarryResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| QuarryError::ConfigError {
            reason: format!("column pattern '{}' does not compile: {}", pattern, e),
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ColumnDetector;
    use crate::filter::FieldMap;

    #[test]
    fn test_detects_indonesian_headers() {
        let row = json!({ "No": 1, "Tanggal": "2024-01-01", "Jumlah": 5000, "Kategori": "sewa" });
        let fields = ColumnDetector::new().unwrap().detect(row.as_object());
        assert_eq!(fields, FieldMap::new("Tanggal", "Jumlah", "Kategori"));
    }

    #[test]
    fn test_date_falls_back_to_first_column() {
        let row = json!({ "Period": "2024-01", "Total Value": 10 });
        let fields = ColumnDetector::new().unwrap().detect(row.as_object());
        assert_eq!(fields.date, "Period");
        assert_eq!(fields.amount, "Total Value");
        assert_eq!(fields.category, "category");
    }

    #[test]
    fn test_no_rows_uses_conventional_names() {
        assert_eq!(ColumnDetector::new().unwrap().detect(None), FieldMap::default());
    }
}
