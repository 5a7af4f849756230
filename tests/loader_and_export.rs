use invoice_workbench::agent::{parse_action, Action, ColumnMode};
use invoice_workbench::downloader::{audit_to_text, to_csv, to_xlsx};
use invoice_workbench::errors::WorkbenchError;
use invoice_workbench::loader::parse_upload;
use invoice_workbench::record::{ColumnKind, Value};
use invoice_workbench::session::AuditEvent;
use serde_json::json;

const SAMPLE_CSV: &[u8] = b"Vendor Name,Invoice #,Amount,Due Date,Pay Group\n\
Amazon,INV-001,1500,2025-01-10,SCF\n\
Globex,INV-002,250.5,2025-02-01,Weekly\n\
Initech,INV-003,$980.00,2025-02-15,Pay Group 3\n";

#[test]
fn csv_upload_parses_schema_rows_and_pay_group() {
    let upload = parse_upload("invoices.csv", SAMPLE_CSV).unwrap();

    let names: Vec<&str> = upload.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Vendor Name", "Invoice #", "Amount", "Due Date", "Pay Group"]
    );
    assert_eq!(upload.records.len(), 3);
    assert_eq!(upload.pay_group_column.as_deref(), Some("Pay Group"));

    // Row ids are assigned in file order starting at zero.
    let ids: Vec<u64> = upload.records.iter().map(|r| r.row_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);

    // Plain numbers coerce, currency-formatted amounts stay text.
    assert_eq!(
        upload.records[0].get("Amount"),
        Some(&Value::Number(1500.0))
    );
    assert_eq!(
        upload.records[2].get("Amount"),
        Some(&Value::Text("$980.00".to_string()))
    );
}

#[test]
fn column_kinds_are_inferred_from_values() {
    let upload = parse_upload("invoices.csv", SAMPLE_CSV).unwrap();
    let kind_of = |name: &str| {
        upload
            .columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.kind)
            .unwrap()
    };
    assert_eq!(kind_of("Vendor Name"), ColumnKind::Text);
    assert_eq!(kind_of("Due Date"), ColumnKind::Date);
    // Mixed plain/currency values fall back to text.
    assert_eq!(kind_of("Amount"), ColumnKind::Text);
}

#[test]
fn structurally_invalid_uploads_are_parse_errors() {
    let err = parse_upload("data.txt", b"whatever").unwrap_err();
    assert!(matches!(err, WorkbenchError::Parse(_)));

    let err = parse_upload("empty.csv", b"").unwrap_err();
    assert!(matches!(err, WorkbenchError::Parse(_)));

    let err = parse_upload("headers_only.csv", b"A,B,C\n").unwrap_err();
    assert!(matches!(err, WorkbenchError::Parse(_)));

    let err = parse_upload("dup.csv", b"A,A\n1,2\n").unwrap_err();
    assert!(matches!(err, WorkbenchError::Parse(_)));
}

#[test]
fn csv_export_honors_column_selection() {
    let upload = parse_upload("invoices.csv", SAMPLE_CSV).unwrap();
    let view: Vec<_> = upload.records.iter().collect();
    let columns = vec!["Vendor Name".to_string(), "Amount".to_string()];

    let text = to_csv(&columns, &view).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Vendor Name,Amount"));
    assert_eq!(lines.next(), Some("Amazon,1500"));
    assert_eq!(lines.next(), Some("Globex,250.5"));
    assert_eq!(lines.next(), Some("Initech,$980.00"));
}

#[test]
fn xlsx_export_produces_a_workbook() {
    let upload = parse_upload("invoices.csv", SAMPLE_CSV).unwrap();
    let view: Vec<_> = upload.records.iter().collect();
    let columns = vec!["Vendor Name".to_string(), "Amount".to_string()];

    let bytes = to_xlsx(&columns, &view).unwrap();
    // XLSX files are zip archives.
    assert_eq!(&bytes[..2], b"PK");
}

#[test]
fn audit_log_renders_as_tsv() {
    let events = vec![AuditEvent::now(
        "Celda actualizada",
        7,
        "Vendor Name",
        "Amazon",
        "Globex",
    )];
    let text = audit_to_text(&events);
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("TIMESTAMP\tACTION\tROW\tCOLUMN\tOLD_VALUE\tNEW_VALUE")
    );
    let line = lines.next().unwrap();
    assert!(line.contains("Celda actualizada\t7\tVendor Name\tAmazon\tGlobex"));
}

#[test]
fn well_formed_actions_parse_into_the_closed_set() {
    let action = parse_action(json!({
        "action": "add_filter",
        "column": "Vendor Name",
        "value": "Amazon",
    }))
    .unwrap();
    assert_eq!(
        action,
        Action::AddFilter {
            column: "Vendor Name".to_string(),
            value: "Amazon".to_string(),
        }
    );

    let action = parse_action(json!({
        "action": "manage_columns",
        "mode": "show_only",
        "columns": ["Vendor Name"],
    }))
    .unwrap();
    assert_eq!(
        action,
        Action::ManageColumns {
            mode: ColumnMode::ShowOnly,
            columns: vec!["Vendor Name".to_string()],
        }
    );

    let action = parse_action(json!({
        "action": "delete_multiple_rows_by_id_trigger",
        "row_ids": [0, 4, 9],
    }))
    .unwrap();
    assert_eq!(
        action,
        Action::DeleteMultipleRowsByIdTrigger {
            row_ids: vec![0, 4, 9],
        }
    );
}

#[test]
fn unknown_or_malformed_actions_are_rejected() {
    let err = parse_action(json!({ "action": "drop_database" })).unwrap_err();
    assert!(matches!(err, WorkbenchError::InvalidArgument(_)));

    let err = parse_action(json!({ "action": "add_filter", "column": "Vendor Name" }))
        .unwrap_err();
    assert!(matches!(err, WorkbenchError::InvalidArgument(_)));
}
