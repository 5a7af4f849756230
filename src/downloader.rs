use rust_xlsxwriter::{Workbook, Worksheet};

use crate::errors::WorkbenchError;
use crate::filters::GroupRow;
use crate::record::{Record, Value};
use crate::session::AuditEvent;

/// Export a view of the data to XLSX, honoring column visibility and order.
pub fn to_xlsx(columns: &[String], records: &[&Record]) -> Result<Vec<u8>, WorkbenchError> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    for (c, name) in columns.iter().enumerate() {
        worksheet
            .write_string(0, c as u16, name.as_str())
            .map_err(|e| WorkbenchError::Export(e.to_string()))?;
    }

    for (r, record) in records.iter().enumerate() {
        for (c, name) in columns.iter().enumerate() {
            let row = (r + 1) as u32;
            let col = c as u16;
            match record.get(name) {
                Some(Value::Number(n)) => worksheet.write_number(row, col, *n),
                Some(Value::Text(s)) => worksheet.write_string(row, col, s.as_str()),
                None => worksheet.write_string(row, col, ""),
            }
            .map_err(|e| WorkbenchError::Export(e.to_string()))?;
        }
    }

    workbook.push_worksheet(worksheet);
    workbook
        .save_to_buffer()
        .map_err(|e| WorkbenchError::Export(e.to_string()))
}

/// Export grouped aggregates to XLSX.
pub fn grouped_to_xlsx(group_column: &str, rows: &[GroupRow]) -> Result<Vec<u8>, WorkbenchError> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    let headers = [group_column, "sum", "mean", "min", "max", "count"];
    for (c, name) in headers.iter().enumerate() {
        worksheet
            .write_string(0, c as u16, *name)
            .map_err(|e| WorkbenchError::Export(e.to_string()))?;
    }

    for (r, group) in rows.iter().enumerate() {
        let row = (r + 1) as u32;
        worksheet
            .write_string(row, 0, group.key.as_str())
            .and_then(|ws| ws.write_number(row, 1, group.sum))
            .and_then(|ws| ws.write_number(row, 2, group.mean))
            .and_then(|ws| ws.write_number(row, 3, group.min))
            .and_then(|ws| ws.write_number(row, 4, group.max))
            .and_then(|ws| ws.write_number(row, 5, group.count as f64))
            .map_err(|e| WorkbenchError::Export(e.to_string()))?;
    }

    workbook.push_worksheet(worksheet);
    workbook
        .save_to_buffer()
        .map_err(|e| WorkbenchError::Export(e.to_string()))
}

/// Export a view of the data to CSV text.
pub fn to_csv(columns: &[String], records: &[&Record]) -> Result<String, WorkbenchError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(columns)
        .map_err(|e| WorkbenchError::Export(e.to_string()))?;

    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|name| record.get(name).map(|v| v.display()).unwrap_or_default())
            .collect();
        writer
            .write_record(&row)
            .map_err(|e| WorkbenchError::Export(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| WorkbenchError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| WorkbenchError::Export(e.to_string()))
}

/// Render the session's audit trail as tab-separated text.
pub fn audit_to_text(events: &[AuditEvent]) -> String {
    let mut out = String::from("TIMESTAMP\tACTION\tROW\tCOLUMN\tOLD_VALUE\tNEW_VALUE\n");
    for event in events {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            event.timestamp,
            event.action,
            event.row_id,
            event.column,
            event.old_value,
            event.new_value
        ));
    }
    out
}
