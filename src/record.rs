use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::rules::Priority;

/// A scalar cell value. Uploaded data only ever carries numbers and text;
/// dates are text values whose column is typed [`ColumnKind::Date`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn empty() -> Self {
        Value::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Text(s) if s.trim().is_empty())
    }

    /// Render the value the way the grid displays it. Whole numbers drop the
    /// trailing `.0` so `1500.0` compares equal to the text `"1500"`.
    pub fn display(&self) -> String {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// Column type, inferred from the column's non-empty values at load time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Number,
    Date,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Column {
            name: name.into(),
            kind,
        }
    }
}

/// Completeness flag recomputed on every edit: a row with any blank or
/// zero field is flagged so the grid can highlight it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStatus {
    #[serde(rename = "Completo")]
    Complete,
    #[serde(rename = "Incompleto")]
    Incomplete,
}

/// One row of the staging dataset.
///
/// `row_id` is a stable identity assigned at creation and never reused within
/// a session, even after the row is deleted. Row ordering is insertion order,
/// not `row_id` order. `priority` and `priority_reason` are derived by the
/// rule engine and never edited directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub row_id: u64,
    pub fields: HashMap<String, Value>,
    pub priority: Option<Priority>,
    pub priority_reason: String,
    pub row_status: RowStatus,
}

impl Record {
    pub fn new(row_id: u64, fields: HashMap<String, Value>) -> Self {
        let mut record = Record {
            row_id,
            fields,
            priority: None,
            priority_reason: String::new(),
            row_status: RowStatus::Incomplete,
        };
        record.refresh_status();
        record
    }

    /// An all-blank row for `add_row`.
    pub fn blank(row_id: u64, columns: &[Column]) -> Self {
        let fields = columns
            .iter()
            .map(|c| (c.name.clone(), Value::empty()))
            .collect();
        Record::new(row_id, fields)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn set(&mut self, column: &str, value: Value) {
        self.fields.insert(column.to_string(), value);
        self.refresh_status();
    }

    /// Re-derive the completeness flag: blank or literal-zero fields mark the
    /// row incomplete.
    pub fn refresh_status(&mut self) {
        let complete = self.fields.values().all(|v| {
            let s = v.display();
            let s = s.trim();
            !s.is_empty() && s != "0"
        });
        self.row_status = if complete {
            RowStatus::Complete
        } else {
            RowStatus::Incomplete
        };
    }

    /// Serialize the row for the client: fields in schema order plus the
    /// `_row_id`, `_priority`, `_priority_reason`, and `_row_status` system
    /// fields the grid expects.
    pub fn to_json(&self, columns: &[Column]) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("_row_id".to_string(), serde_json::json!(self.row_id));
        for column in columns {
            let value = self
                .fields
                .get(&column.name)
                .cloned()
                .unwrap_or_else(Value::empty);
            map.insert(
                column.name.clone(),
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            );
        }
        map.insert("_priority".to_string(), serde_json::json!(self.priority));
        map.insert(
            "_priority_reason".to_string(),
            serde_json::json!(self.priority_reason),
        );
        map.insert("_row_status".to_string(), serde_json::json!(self.row_status));
        serde_json::Value::Object(map)
    }
}
