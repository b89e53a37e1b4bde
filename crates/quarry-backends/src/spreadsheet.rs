//! Upload ingestion: turns an uploaded file into header fields and rows.
//!
//! Delimited text and Excel workbooks are accepted. Workbooks are read from
//! their first sheet, whose first row is the header. Anything outside the
//! limits is rejected here so nothing malformed reaches a backend.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::Timelike;
use serde_json::{Number, Value};
use tracing::{debug, warn};

use quarry_contracts::{
    error::{QuarryError, QuarryResult},
    tool::Row,
};

/// Size and row ceilings applied before parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    pub max_bytes: usize,
    pub max_rows: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_rows: 10_000,
        }
    }
}

/// A parsed sheet: header names in column order plus one row per data line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedSheet {
    pub fields: Vec<String>,
    pub rows: Vec<Row>,
}

impl ParsedSheet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Parse an uploaded file.
///
/// Cells that read as finite numbers become JSON numbers; everything else
/// stays text. Blank headers are named `col_<n>` by zero-based position.
pub fn parse_upload(bytes: &[u8], filename: &str, limits: &IngestLimits) -> QuarryResult<ParsedSheet> {
    if bytes.len() > limits.max_bytes {
        return Err(rejected(format!(
            "file is {} bytes; the limit is {} bytes",
            bytes.len(),
            limits.max_bytes
        )));
    }
    let (fields, rows) = if is_workbook(bytes, filename) {
        parse_workbook(bytes, filename, limits)?
    } else {
        parse_delimited(bytes, limits)?
    };

    if rows.is_empty() {
        return Err(rejected("file has a header but no data rows".to_string()));
    }

    debug!(filename = %filename, fields = fields.len(), rows = rows.len(), "upload parsed");
    Ok(ParsedSheet { fields, rows })
}

fn parse_delimited(bytes: &[u8], limits: &IngestLimits) -> QuarryResult<(Vec<String>, Vec<Row>)> {
    let text = std::str::from_utf8(bytes).map_err(|_| rejected("file is not UTF-8 text".to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let Some(header) = lines.next() else {
        return Err(rejected("file is empty".to_string()));
    };
    let fields = header_fields(split_line(header).iter().map(|name| name.trim_matches('"')));

    let mut rows = Vec::new();
    for line in lines {
        if rows.len() == limits.max_rows {
            return Err(too_many_rows(limits));
        }
        let values = split_line(line);
        let row: Row = fields
            .iter()
            .enumerate()
            .map(|(j, field)| (field.clone(), coerce(values.get(j).map(String::as_str).unwrap_or(""))))
            .collect();
        rows.push(row);
    }
    Ok((fields, rows))
}

/// First sheet only. Rows with no non-empty cell are skipped, like blank
/// lines in delimited text.
fn parse_workbook(bytes: &[u8], filename: &str, limits: &IngestLimits) -> QuarryResult<(Vec<String>, Vec<Row>)> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(|e| {
        warn!(filename = %filename, error = %e, "workbook unreadable");
        rejected(format!("could not read workbook: {}", e))
    })?;
    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(e)) => return Err(rejected(format!("could not read first sheet: {}", e))),
        None => return Err(rejected("workbook has no sheets".to_string())),
    };

    let mut lines = range
        .rows()
        .filter(|cells| cells.iter().any(|cell| !matches!(cell, Data::Empty)));
    let Some(header) = lines.next() else {
        return Err(rejected("file is empty".to_string()));
    };
    let names: Vec<String> = header.iter().map(cell_text).collect();
    let fields = header_fields(names.iter().map(String::as_str));

    let mut rows = Vec::new();
    for cells in lines {
        if rows.len() == limits.max_rows {
            return Err(too_many_rows(limits));
        }
        let row: Row = fields
            .iter()
            .enumerate()
            .map(|(j, field)| (field.clone(), cell_value(cells.get(j).unwrap_or(&Data::Empty))))
            .collect();
        rows.push(row);
    }
    debug!(filename = %filename, sheet_rows = range.height(), "workbook read");
    Ok((fields, rows))
}

/// Trimmed header names; blanks become `col_<n>` by zero-based position.
fn header_fields<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    names
        .enumerate()
        .map(|(j, name)| {
            let name = name.trim();
            if name.is_empty() {
                format!("col_{}", j)
            } else {
                name.to_string()
            }
        })
        .collect()
}

fn too_many_rows(limits: &IngestLimits) -> QuarryError {
    rejected(format!("file has more than {} rows", limits.max_rows))
}

/// A workbook cell as JSON, coerced the same way as delimited text.
///
/// Dates become `YYYY-MM-DD` text, with the time appended when it is not
/// midnight.
fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::String(String::new()),
        Data::Int(n) => Value::from(*n),
        Data::Float(n) => float_value(*n),
        Data::Bool(b) => Value::Bool(*b),
        _ => coerce(cell_text(cell).trim()),
    }
}

fn float_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::String(String::new()))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => text.clone(),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(at) if at.num_seconds_from_midnight() == 0 => at.format("%Y-%m-%d").to_string(),
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => cell.to_string(),
        },
        other => other.to_string(),
    }
}

fn rejected(reason: String) -> QuarryError {
    QuarryError::UploadRejected { reason }
}

/// `.xlsx`/`.xls` by name, or a zip container by magic bytes.
fn is_workbook(bytes: &[u8], filename: &str) -> bool {
    let name = filename.to_lowercase();
    if name.ends_with(".csv") || name.ends_with(".tsv") || name.ends_with(".txt") {
        return false;
    }
    name.ends_with(".xlsx") || name.ends_with(".xls") || bytes.starts_with(b"PK")
}

/// Split one line on commas outside quotes, or on tabs.
///
/// Quotes toggle quoting and are dropped; cells are trimmed.
fn split_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => cells.push(std::mem::take(&mut current).trim().to_string()),
            '\t' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn coerce(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::String(String::new());
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Value::from(n);
    }
    match cell.parse::<f64>().ok().filter(|n| n.is_finite()).and_then(Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(cell.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
