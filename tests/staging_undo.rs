use std::collections::HashMap;

use invoice_workbench::errors::WorkbenchError;
use invoice_workbench::history::{Affected, MAX_UNDO_DEPTH};
use invoice_workbench::record::{Column, ColumnKind, Record, Value};
use invoice_workbench::rules::RuleBook;
use invoice_workbench::staging::Staging;

fn columns() -> Vec<Column> {
    vec![
        Column::new("Vendor Name", ColumnKind::Text),
        Column::new("Invoice #", ColumnKind::Text),
        Column::new("Amount", ColumnKind::Number),
        Column::new("Due Date", ColumnKind::Date),
    ]
}

fn record(row_id: u64, vendor: &str, invoice: &str, amount: f64, due: &str) -> Record {
    let mut fields = HashMap::new();
    fields.insert("Vendor Name".to_string(), Value::Text(vendor.to_string()));
    fields.insert("Invoice #".to_string(), Value::Text(invoice.to_string()));
    fields.insert("Amount".to_string(), Value::Number(amount));
    fields.insert("Due Date".to_string(), Value::Text(due.to_string()));
    Record::new(row_id, fields)
}

fn build_staging() -> (Staging, RuleBook) {
    let book = RuleBook::default();
    let records = vec![
        record(0, "Amazon", "INV-001", 100.0, "2025-01-10"),
        record(1, "Globex", "INV-002", 250.0, "2025-02-01"),
        record(2, "Initech", "INV-003", 75.5, "2025-02-15"),
        record(3, "Umbrella", "INV-004", 980.0, "2025-03-01"),
    ];
    (Staging::new(columns(), records, None, &book), book)
}

fn ids(staging: &Staging) -> Vec<u64> {
    staging.records().iter().map(|r| r.row_id).collect()
}

#[test]
fn mixed_mutation_sequence_fully_undoes_to_initial_state() {
    let (mut staging, book) = build_staging();
    let initial: Vec<Record> = staging.records().to_vec();

    let mut pushes = 0;
    let report = staging
        .edit_cell(&book, 0, "Vendor Name", Value::from("Amazon MX"))
        .unwrap();
    assert_eq!(report.changed, 1);
    pushes += 1;

    let (_, _) = staging.add_row(&book);
    pushes += 1;

    staging.delete_row(&book, 2).unwrap();
    pushes += 1;

    let report = staging
        .bulk_edit(&book, &[1, 3], "Invoice #", Value::from("REPLACED"))
        .unwrap();
    assert_eq!(report.changed, 2);
    pushes += 1;

    let report = staging
        .find_replace_in_selection(&book, &[0], "Vendor Name", "MX", "US")
        .unwrap();
    assert_eq!(report.changed, 1);
    pushes += 1;

    let report = staging.bulk_delete_rows(&book, &[1, 3]);
    assert_eq!(report.changed, 2);
    pushes += 1;

    assert!(pushes <= MAX_UNDO_DEPTH);
    assert_eq!(staging.history_len(), pushes);

    for _ in 0..pushes {
        let report = staging.undo(&book);
        assert_eq!(report.changed, 1);
    }

    assert_eq!(staging.history_len(), 0);
    assert_eq!(staging.records(), initial.as_slice());
}

#[test]
fn delete_then_undo_restores_row_at_original_index() {
    let (mut staging, book) = build_staging();

    staging.delete_row(&book, 1).unwrap();
    assert_eq!(ids(&staging), vec![0, 2, 3]);

    let report = staging.undo(&book);
    assert_eq!(report.affected, Some(Affected::Row(1)));
    assert_eq!(ids(&staging), vec![0, 1, 2, 3]);
}

#[test]
fn bulk_delete_undo_restores_every_row_at_its_own_index() {
    let (mut staging, book) = build_staging();

    let report = staging.bulk_delete_rows(&book, &[1, 3]);
    assert_eq!(report.changed, 2);
    assert_eq!(ids(&staging), vec![0, 2]);

    let report = staging.undo(&book);
    assert_eq!(report.affected, Some(Affected::bulk()));
    assert_eq!(ids(&staging), vec![0, 1, 2, 3]);
}

#[test]
fn history_is_a_sliding_window_of_fifteen() {
    let (mut staging, book) = build_staging();

    for i in 1..=(MAX_UNDO_DEPTH + 1) {
        staging
            .edit_cell(&book, 0, "Invoice #", Value::Text(format!("v{i}")))
            .unwrap();
    }
    assert_eq!(staging.history_len(), MAX_UNDO_DEPTH);

    for _ in 0..MAX_UNDO_DEPTH {
        staging.undo(&book);
    }
    assert_eq!(staging.history_len(), 0);

    // The oldest edit fell off the window and became permanent.
    let value = staging.record(0).unwrap().get("Invoice #").unwrap();
    assert_eq!(value, &Value::Text("v1".to_string()));
}

#[test]
fn bulk_edit_undoes_as_one_atomic_unit() {
    let (mut staging, book) = build_staging();

    staging
        .bulk_edit(&book, &[0, 1, 2], "Vendor Name", Value::from("Acme"))
        .unwrap();
    assert_eq!(staging.history_len(), 1);

    staging.undo(&book);
    assert_eq!(staging.history_len(), 0);
    let vendors: Vec<String> = staging
        .records()
        .iter()
        .map(|r| r.get("Vendor Name").unwrap().display())
        .collect();
    assert_eq!(vendors, vec!["Amazon", "Globex", "Initech", "Umbrella"]);
}

#[test]
fn add_delete_commit_leaves_no_history_and_no_row() {
    let (mut staging, book) = build_staging();

    let (row_id, _) = staging.add_row(&book);
    assert_eq!(row_id, 4);
    staging.delete_row(&book, row_id).unwrap();
    assert!(staging.commit());

    assert_eq!(staging.history_len(), 0);
    assert!(staging.record(row_id).is_none());
    assert_eq!(ids(&staging), vec![0, 1, 2, 3]);
}

#[test]
fn commit_on_empty_history_is_a_noop() {
    let (mut staging, _) = build_staging();
    assert!(!staging.commit());
}

#[test]
fn undo_on_empty_history_is_a_benign_noop() {
    let (mut staging, book) = build_staging();
    let report = staging.undo(&book);
    assert_eq!(report.changed, 0);
    assert_eq!(report.affected, None);
    assert_eq!(report.history_len, 0);
}

#[test]
fn unchanged_edit_pushes_no_history() {
    let (mut staging, book) = build_staging();
    let report = staging
        .edit_cell(&book, 0, "Vendor Name", Value::from("Amazon"))
        .unwrap();
    assert_eq!(report.changed, 0);
    assert_eq!(staging.history_len(), 0);
}

#[test]
fn row_ids_are_never_reused() {
    let (mut staging, book) = build_staging();

    let (first, _) = staging.add_row(&book);
    staging.delete_row(&book, first).unwrap();
    let (second, _) = staging.add_row(&book);
    assert!(second > first);
}

#[test]
fn unknown_row_and_column_are_not_found() {
    let (mut staging, book) = build_staging();

    let err = staging
        .edit_cell(&book, 99, "Vendor Name", Value::from("x"))
        .unwrap_err();
    assert!(matches!(err, WorkbenchError::NotFound(_)));

    let err = staging
        .edit_cell(&book, 0, "No Such Column", Value::from("x"))
        .unwrap_err();
    assert!(matches!(err, WorkbenchError::NotFound(_)));

    let err = staging.delete_row(&book, 99).unwrap_err();
    assert!(matches!(err, WorkbenchError::NotFound(_)));
}

#[test]
fn date_column_rejects_garbage_but_accepts_empty_and_dates() {
    let (mut staging, book) = build_staging();

    let err = staging
        .edit_cell(&book, 0, "Due Date", Value::from("soon"))
        .unwrap_err();
    assert!(matches!(err, WorkbenchError::InvalidArgument(_)));
    assert_eq!(staging.history_len(), 0);

    staging
        .edit_cell(&book, 0, "Due Date", Value::from(""))
        .unwrap();
    staging
        .edit_cell(&book, 0, "Due Date", Value::from("2025-06-30"))
        .unwrap();
    assert_eq!(staging.history_len(), 2);
}

#[test]
fn find_replace_requires_find_text_and_replaces_substrings() {
    let (mut staging, book) = build_staging();

    let err = staging
        .find_replace_in_selection(&book, &[0], "Vendor Name", "", "x")
        .unwrap_err();
    assert!(matches!(err, WorkbenchError::InvalidArgument(_)));

    staging
        .find_replace_in_selection(&book, &[0, 1], "Invoice #", "INV", "FAC")
        .unwrap();
    assert_eq!(
        staging.record(0).unwrap().get("Invoice #").unwrap().display(),
        "FAC-001"
    );
    assert_eq!(
        staging.record(1).unwrap().get("Invoice #").unwrap().display(),
        "FAC-002"
    );
    // Unselected rows untouched.
    assert_eq!(
        staging.record(2).unwrap().get("Invoice #").unwrap().display(),
        "INV-003"
    );
}

#[test]
fn bulk_operations_skip_missing_rows_without_failing() {
    let (mut staging, book) = build_staging();

    let report = staging
        .bulk_edit(&book, &[0, 77, 99], "Vendor Name", Value::from("Acme"))
        .unwrap();
    assert_eq!(report.changed, 1);

    let report = staging.bulk_delete_rows(&book, &[42, 43]);
    assert_eq!(report.changed, 0);
    assert_eq!(staging.records().len(), 4);
}

#[test]
fn delete_column_is_undoable_with_values_and_position() {
    let (mut staging, book) = build_staging();

    staging.delete_column(&book, "Invoice #").unwrap();
    assert!(staging.columns().iter().all(|c| c.name != "Invoice #"));
    assert!(staging.record(0).unwrap().get("Invoice #").is_none());

    staging.undo(&book);
    assert_eq!(staging.columns()[1].name, "Invoice #");
    assert_eq!(
        staging.record(0).unwrap().get("Invoice #").unwrap().display(),
        "INV-001"
    );
}
