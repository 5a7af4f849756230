use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::analytics::parse_amount;
use crate::record::Record;

/// One active filter. Filters AND-combine in list order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

fn matches(record: &Record, filter: &Filter) -> bool {
    match record.get(&filter.column) {
        Some(value) => value
            .display()
            .to_lowercase()
            .contains(&filter.value.trim().to_lowercase()),
        None => false,
    }
}

/// The view the client renders: every record whose cells contain every
/// filter's value, case-insensitively, with numeric and date cells compared
/// as their display strings. Insertion order is preserved.
pub fn apply_filters<'a>(records: &'a [Record], filters: &[Filter]) -> Vec<&'a Record> {
    records
        .iter()
        .filter(|r| filters.iter().all(|f| matches(r, f)))
        .collect()
}

/// Per-group aggregates over the designated amount column.
#[derive(Clone, Debug, Serialize)]
pub struct GroupRow {
    pub key: String,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Group records by the exact display value of `column`, first-seen order.
/// Without an amount column the aggregates stay zero and only counts are
/// meaningful.
pub fn group_by(records: &[&Record], column: &str, amount_column: Option<&str>) -> Vec<GroupRow> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<f64>, usize)> = Vec::new();

    for record in records {
        let key = record
            .get(column)
            .map(|v| v.display())
            .unwrap_or_default();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Vec::new(), 0));
            groups.len() - 1
        });
        groups[slot].2 += 1;
        if let Some(col) = amount_column {
            if let Some(amount) = record.get(col).and_then(parse_amount) {
                groups[slot].1.push(amount);
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, amounts, count)| {
            let sum: f64 = amounts.iter().sum();
            let mean = if amounts.is_empty() {
                0.0
            } else {
                sum / amounts.len() as f64
            };
            let min = amounts.iter().copied().fold(f64::INFINITY, f64::min);
            let max = amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            GroupRow {
                key,
                sum: round2(sum),
                mean: round2(mean),
                min: if min.is_finite() { round2(min) } else { 0.0 },
                max: if max.is_finite() { round2(max) } else { 0.0 },
                count,
            }
        })
        .collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
