use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

use crate::record::{Column, Record, Value};

lazy_static! {
    static ref CURRENCY_CHARS: Regex = Regex::new(r"[$,]").unwrap();
}

/// Column names recognized as the monetary column, matched case-insensitively.
const AMOUNT_COLUMN_NAMES: &[&str] = &["monto", "total", "amount", "total amount"];

/// Column names recognized as the invoice-number column.
const INVOICE_COLUMN_NAMES: &[&str] = &[
    "invoice #",
    "invoice number",
    "n° factura",
    "factura",
    "invoice id",
];

/// Column names recognized as the vendor column.
const VENDOR_COLUMN_NAMES: &[&str] = &["vendor", "vendor name", "proveedor", "supplier"];

fn find_column<'a>(columns: &'a [Column], names: &[&str]) -> Option<&'a str> {
    columns
        .iter()
        .find(|c| names.contains(&c.name.trim().to_lowercase().as_str()))
        .map(|c| c.name.as_str())
}

pub fn find_amount_column(columns: &[Column]) -> Option<&str> {
    find_column(columns, AMOUNT_COLUMN_NAMES)
}

pub fn find_invoice_column(columns: &[Column]) -> Option<&str> {
    find_column(columns, INVOICE_COLUMN_NAMES)
}

pub fn find_vendor_column(columns: &[Column]) -> Option<&str> {
    find_column(columns, VENDOR_COLUMN_NAMES)
}

/// Parse a cell as a monetary amount, tolerating `$` signs and thousands
/// separators. Returns `None` for anything non-numeric.
pub fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Text(s) => {
            let cleaned = CURRENCY_CHARS.replace_all(s.trim(), "");
            cleaned.parse::<f64>().ok()
        }
    }
}

/// Aggregate figures over a view of the staging data.
///
/// Non-numeric amounts contribute 0 to the sum and stay in the average
/// denominator, so the average is always `total / count` for a non-empty
/// view.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub total_amount: f64,
    pub average_amount: f64,
}

pub fn summarize<'a, I>(records: I, amount_column: Option<&str>) -> Summary
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut count = 0usize;
    let mut total = 0.0f64;

    for record in records {
        count += 1;
        if let Some(col) = amount_column {
            if let Some(amount) = record.get(col).and_then(parse_amount) {
                total += amount;
            }
        }
    }

    Summary {
        count,
        total_amount: total,
        average_amount: if count > 0 { total / count as f64 } else { 0.0 },
    }
}

/// One flagged outlier row.
#[derive(Clone, Debug, Serialize)]
pub struct Anomaly {
    pub row_id: u64,
    pub z_score: f64,
    /// `z_score` mapped onto a 0–10 display scale.
    pub risk: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AnomalyReport {
    pub mean: f64,
    pub threshold: f64,
    pub anomalies: Vec<Anomaly>,
}

/// Flag rows whose amount is an outlier against the rest of the column.
///
/// Each row is scored with a leave-one-out Z-score: its deviation from the
/// mean of the *other* rows, in units of their population standard deviation.
/// The plain variant is bounded by the square root of the row count and can
/// never clear a threshold of 2 on small datasets, so a dominant outlier
/// would go unflagged. Non-numeric amounts count as 0, matching the summary
/// convention. Fewer than three rows, or zero deviation with zero spread,
/// produce no anomalies — never an error.
pub fn detect_anomalies(records: &[Record], amount_column: &str, threshold: f64) -> AnomalyReport {
    let values: Vec<f64> = records
        .iter()
        .map(|r| r.get(amount_column).and_then(parse_amount).unwrap_or(0.0))
        .collect();

    let n = values.len();
    let total: f64 = values.iter().sum();
    let mean = if n > 0 { total / n as f64 } else { 0.0 };

    let mut anomalies = Vec::new();
    if n >= 3 {
        for (i, record) in records.iter().enumerate() {
            let value = values[i];
            let rest_n = (n - 1) as f64;
            let rest_mean = (total - value) / rest_n;
            let rest_var = values
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, v)| (v - rest_mean) * (v - rest_mean))
                .sum::<f64>()
                / rest_n;
            let rest_std = rest_var.sqrt();
            let deviation = value - rest_mean;

            let z = if rest_std > 0.0 {
                deviation / rest_std
            } else if deviation.abs() > f64::EPSILON {
                f64::INFINITY
            } else {
                0.0
            };

            if z > threshold {
                // Infinite scores (zero spread among the other rows) clamp to
                // a JSON-safe display value.
                let (z, risk) = if z.is_finite() {
                    (
                        (z * 100.0).round() / 100.0,
                        ((5.0 * z / threshold).min(10.0) * 10.0).round() / 10.0,
                    )
                } else {
                    (99.0, 10.0)
                };
                anomalies.push(Anomaly {
                    row_id: record.row_id,
                    z_score: z,
                    risk,
                });
            }
        }
    }

    AnomalyReport {
        mean,
        threshold,
        anomalies,
    }
}

/// Normalized duplicate key: case-folded, trimmed (vendor, invoice number).
fn duplicate_key(record: &Record, vendor_column: Option<&str>, invoice_column: &str) -> String {
    let invoice = record
        .get(invoice_column)
        .map(|v| v.display().trim().to_lowercase())
        .unwrap_or_default();
    let vendor = vendor_column
        .and_then(|col| record.get(col))
        .map(|v| v.display().trim().to_lowercase())
        .unwrap_or_default();
    format!("{vendor}\u{1f}{invoice}")
}

/// All members of every duplicate group, in first-seen group order.
pub fn find_duplicates<'a>(
    records: &'a [Record],
    vendor_column: Option<&str>,
    invoice_column: &str,
) -> Vec<&'a Record> {
    let mut groups: HashMap<String, Vec<&Record>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for record in records {
        let key = duplicate_key(record, vendor_column, invoice_column);
        let group = groups.entry(key.clone()).or_default();
        if group.is_empty() {
            order.push(key);
        }
        group.push(record);
    }

    let mut duplicates = Vec::new();
    for key in &order {
        if let Some(group) = groups.get(key) {
            if group.len() > 1 {
                duplicates.extend(group.iter().copied());
            }
        }
    }
    duplicates
}

/// Row ids of every non-first occurrence, i.e. what a cleanup deletes while
/// keeping the first occurrence as canonical.
pub fn duplicate_cleanup_ids(
    records: &[Record],
    vendor_column: Option<&str>,
    invoice_column: &str,
) -> Vec<u64> {
    let mut seen: HashMap<String, bool> = HashMap::new();
    let mut ids = Vec::new();

    for record in records {
        let key = duplicate_key(record, vendor_column, invoice_column);
        if seen.insert(key, true).is_some() {
            ids.push(record.row_id);
        }
    }
    ids
}
