use std::collections::HashMap;

use invoice_workbench::analytics::{
    detect_anomalies, duplicate_cleanup_ids, find_duplicates, parse_amount, summarize,
};
use invoice_workbench::record::{Record, Value};

fn amount_record(row_id: u64, amount: &str) -> Record {
    let mut fields = HashMap::new();
    fields.insert("Amount".to_string(), Value::Text(amount.to_string()));
    Record::new(row_id, fields)
}

fn invoice_record(row_id: u64, vendor: &str, invoice: &str) -> Record {
    let mut fields = HashMap::new();
    fields.insert("Vendor Name".to_string(), Value::Text(vendor.to_string()));
    fields.insert("Invoice #".to_string(), Value::Text(invoice.to_string()));
    Record::new(row_id, fields)
}

#[test]
fn parse_amount_tolerates_currency_formatting() {
    assert_eq!(parse_amount(&Value::from("$1,234.50")), Some(1234.5));
    assert_eq!(parse_amount(&Value::from("  1500 ")), Some(1500.0));
    assert_eq!(parse_amount(&Value::Number(42.0)), Some(42.0));
    assert_eq!(parse_amount(&Value::from("n/a")), None);
    assert_eq!(parse_amount(&Value::from("")), None);
}

#[test]
fn summary_counts_non_numeric_rows_in_the_denominator() {
    let records = vec![amount_record(0, "100"), amount_record(1, "sin monto")];
    let summary = summarize(records.iter(), Some("Amount"));
    assert_eq!(summary.count, 2);
    assert_eq!(summary.total_amount, 100.0);
    assert_eq!(summary.average_amount, 50.0);
}

#[test]
fn dominant_outlier_is_flagged_at_threshold_two() {
    let records = vec![
        amount_record(0, "100"),
        amount_record(1, "100"),
        amount_record(2, "100"),
        amount_record(3, "10000"),
    ];
    let report = detect_anomalies(&records, "Amount", 2.0);

    assert_eq!(report.anomalies.len(), 1);
    assert_eq!(report.anomalies[0].row_id, 3);
    assert_eq!(report.anomalies[0].risk, 10.0);
    assert_eq!(report.mean, 2575.0);
}

#[test]
fn zero_variance_yields_no_anomalies() {
    let records = vec![
        amount_record(0, "250"),
        amount_record(1, "250"),
        amount_record(2, "250"),
        amount_record(3, "250"),
    ];
    let report = detect_anomalies(&records, "Amount", 2.0);
    assert!(report.anomalies.is_empty());
}

#[test]
fn non_numeric_column_yields_no_anomalies() {
    let records = vec![
        amount_record(0, "alto"),
        amount_record(1, "bajo"),
        amount_record(2, "medio"),
    ];
    let report = detect_anomalies(&records, "Amount", 2.0);
    assert!(report.anomalies.is_empty());
}

#[test]
fn tiny_datasets_are_not_scored() {
    let records = vec![amount_record(0, "1"), amount_record(1, "1000000")];
    let report = detect_anomalies(&records, "Amount", 2.0);
    assert!(report.anomalies.is_empty());
}

#[test]
fn moderate_outliers_get_a_proportional_risk() {
    let records = vec![
        amount_record(0, "90"),
        amount_record(1, "100"),
        amount_record(2, "110"),
        amount_record(3, "95"),
        amount_record(4, "105"),
        amount_record(5, "400"),
    ];
    let report = detect_anomalies(&records, "Amount", 2.0);
    assert_eq!(report.anomalies.len(), 1);
    assert_eq!(report.anomalies[0].row_id, 5);
    assert!(report.anomalies[0].z_score > 2.0);
    assert!(report.anomalies[0].risk > 5.0 && report.anomalies[0].risk <= 10.0);
}

#[test]
fn duplicates_group_by_normalized_vendor_and_invoice() {
    let records = vec![
        invoice_record(0, "Acme", "INV-1"),
        invoice_record(1, " acme ", "inv-1"),
        invoice_record(2, "Acme", "INV-2"),
        invoice_record(3, "Globex", "INV-1"),
    ];

    let duplicates = find_duplicates(&records, Some("Vendor Name"), "Invoice #");
    let ids: Vec<u64> = duplicates.iter().map(|r| r.row_id).collect();
    assert_eq!(ids, vec![0, 1]);
}

#[test]
fn cleanup_keeps_the_first_occurrence() {
    let records = vec![
        invoice_record(0, "Acme", "INV-1"),
        invoice_record(1, "Acme", "INV-1"),
        invoice_record(2, "Acme", "INV-1"),
        invoice_record(3, "Globex", "INV-9"),
    ];

    let doomed = duplicate_cleanup_ids(&records, Some("Vendor Name"), "Invoice #");
    assert_eq!(doomed, vec![1, 2]);
}

#[test]
fn same_invoice_number_across_vendors_is_not_a_duplicate() {
    let records = vec![
        invoice_record(0, "Acme", "INV-1"),
        invoice_record(1, "Globex", "INV-1"),
    ];
    let doomed = duplicate_cleanup_ids(&records, Some("Vendor Name"), "Invoice #");
    assert!(doomed.is_empty());
}
