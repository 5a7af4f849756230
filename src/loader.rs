use calamine::{Data, Reader, Xlsx};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::io::Cursor;

use crate::errors::WorkbenchError;
use crate::record::{Column, ColumnKind, Record, Value};

/// The upload contract: ordered column schema, ordered records with assigned
/// row ids, and the detected pay-group column (drives the built-in priority
/// pass).
#[derive(Debug)]
pub struct ParsedUpload {
    pub columns: Vec<Column>,
    pub records: Vec<Record>,
    pub pay_group_column: Option<String>,
}

/// Parse uploaded spreadsheet bytes by extension. CSV and XLSX are the
/// supported formats; anything else is a `Parse` failure.
pub fn parse_upload(filename: &str, bytes: &[u8]) -> Result<ParsedUpload, WorkbenchError> {
    let extension = filename
        .rsplit('.')
        .next()
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();

    let (headers, rows) = match extension.as_str() {
        "csv" => parse_csv(bytes)?,
        "xlsx" | "xls" => parse_xlsx(bytes)?,
        other => {
            return Err(WorkbenchError::Parse(format!(
                "unsupported file extension '{other}'"
            )));
        }
    };

    if headers.is_empty() {
        return Err(WorkbenchError::Parse("file has no header row".to_string()));
    }
    if rows.is_empty() {
        return Err(WorkbenchError::Parse("file has no data rows".to_string()));
    }

    build_upload(headers, rows)
}

fn parse_csv(bytes: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>), WorkbenchError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| WorkbenchError::Parse(format!("invalid CSV header: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record =
            result.map_err(|e| WorkbenchError::Parse(format!("invalid CSV row: {e}")))?;
        let mut row: Vec<String> = record.iter().map(|v| v.to_string()).collect();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }
    Ok((headers, rows))
}

fn parse_xlsx(bytes: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>), WorkbenchError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| WorkbenchError::Parse(format!("invalid XLSX file: {e}")))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| WorkbenchError::Parse("workbook has no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| WorkbenchError::Parse(format!("failed to read sheet: {e}")))?;

    let mut iter = range.rows();
    let headers: Vec<String> = iter
        .next()
        .ok_or_else(|| WorkbenchError::Parse("sheet is empty".to_string()))?
        .iter()
        .map(|cell| cell_text(cell).trim().to_string())
        .collect();

    let rows = iter
        .map(|row| {
            let mut values: Vec<String> = row.iter().map(cell_text).collect();
            values.resize(headers.len(), String::new());
            values
        })
        .collect();
    Ok((headers, rows))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];

fn looks_like_date(text: &str) -> bool {
    DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(text, fmt).is_ok())
}

/// A plain (non-currency) number becomes `Value::Number`; everything else
/// stays text. Currency-formatted amounts stay text and are cleaned at
/// aggregation time instead.
fn coerce(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::empty();
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => Value::Number(n),
        _ => Value::Text(trimmed.to_string()),
    }
}

fn infer_kind(samples: &[&str]) -> ColumnKind {
    let non_empty: Vec<&str> = samples
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if non_empty.is_empty() {
        return ColumnKind::Text;
    }
    if non_empty.iter().all(|s| s.parse::<f64>().is_ok()) {
        return ColumnKind::Number;
    }
    if non_empty.iter().all(|s| looks_like_date(s)) {
        return ColumnKind::Date;
    }
    ColumnKind::Text
}

fn build_upload(
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> Result<ParsedUpload, WorkbenchError> {
    let mut seen = HashMap::new();
    for header in &headers {
        if header.is_empty() {
            return Err(WorkbenchError::Parse("blank column name".to_string()));
        }
        if seen.insert(header.clone(), ()).is_some() {
            return Err(WorkbenchError::Parse(format!(
                "duplicate column name '{header}'"
            )));
        }
    }

    let columns: Vec<Column> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let samples: Vec<&str> = rows.iter().map(|row| row[i].as_str()).collect();
            Column::new(name.clone(), infer_kind(&samples))
        })
        .collect();

    let records: Vec<Record> = rows
        .iter()
        .enumerate()
        .map(|(row_id, row)| {
            let fields = headers
                .iter()
                .zip(row.iter())
                .map(|(name, raw)| (name.clone(), coerce(raw)))
                .collect();
            Record::new(row_id as u64, fields)
        })
        .collect();

    let pay_group_column = headers
        .iter()
        .find(|name| name.to_lowercase().contains("pay group"))
        .cloned();

    Ok(ParsedUpload {
        columns,
        records,
        pay_group_column,
    })
}
