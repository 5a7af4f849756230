use std::collections::HashMap;

use invoice_workbench::analytics::summarize;
use invoice_workbench::filters::{apply_filters, group_by, Filter};
use invoice_workbench::record::{Column, ColumnKind, Record, Value};
use invoice_workbench::rules::{
    recompute, Condition, Operator, Priority, Rule, RuleBook, Settings,
};
use invoice_workbench::staging::Staging;

fn columns() -> Vec<Column> {
    vec![
        Column::new("Vendor Name", ColumnKind::Text),
        Column::new("Amount", ColumnKind::Text),
        Column::new("Pay Group", ColumnKind::Text),
    ]
}

fn record(row_id: u64, vendor: &str, amount: &str, pay_group: &str) -> Record {
    let mut fields = HashMap::new();
    fields.insert("Vendor Name".to_string(), Value::Text(vendor.to_string()));
    fields.insert("Amount".to_string(), Value::Text(amount.to_string()));
    fields.insert("Pay Group".to_string(), Value::Text(pay_group.to_string()));
    Record::new(row_id, fields)
}

fn rule(priority: Priority, reason: &str, column: &str, op: Operator, value: &str) -> Rule {
    Rule {
        id: reason.to_string(),
        active: true,
        priority,
        reason: reason.to_string(),
        conditions: vec![Condition {
            column: column.to_string(),
            operator: op,
            value: value.to_string(),
        }],
    }
}

fn no_base() -> Settings {
    Settings {
        enable_scf_intercompany: false,
        enable_age_sort: true,
    }
}

#[test]
fn matching_rule_sets_priority_and_editing_away_clears_it() {
    let mut book = RuleBook::default();
    book.settings = no_base();
    book.rules.push(rule(
        Priority::Alta,
        "Proveedor crítico",
        "Vendor Name",
        Operator::Equals,
        "Microsoft",
    ));

    let records = vec![record(0, "Microsoft", "100", "")];
    let mut staging = Staging::new(columns(), records, None, &book);
    assert_eq!(staging.record(0).unwrap().priority, Some(Priority::Alta));
    assert_eq!(staging.record(0).unwrap().priority_reason, "Proveedor crítico");

    staging
        .edit_cell(&book, 0, "Vendor Name", Value::from("Apple"))
        .unwrap();
    assert_eq!(staging.record(0).unwrap().priority, None);
    assert_eq!(staging.record(0).unwrap().priority_reason, "");
}

#[test]
fn higher_priority_tier_wins_over_list_order() {
    let mut book = RuleBook::default();
    book.settings = no_base();
    book.rules.push(rule(
        Priority::Baja,
        "regla baja",
        "Vendor Name",
        Operator::Contains,
        "acme",
    ));
    book.rules.push(rule(
        Priority::Alta,
        "regla alta",
        "Vendor Name",
        Operator::Contains,
        "acme",
    ));

    let mut records = vec![record(0, "Acme Corp", "10", "")];
    recompute(&mut records, &book, None);
    assert_eq!(records[0].priority, Some(Priority::Alta));
    assert_eq!(records[0].priority_reason, "regla alta");
}

#[test]
fn same_tier_ties_break_by_list_order() {
    let mut book = RuleBook::default();
    book.settings = no_base();
    book.rules.push(rule(
        Priority::Alta,
        "primera",
        "Vendor Name",
        Operator::Contains,
        "acme",
    ));
    book.rules.push(rule(
        Priority::Alta,
        "segunda",
        "Vendor Name",
        Operator::Contains,
        "acme",
    ));

    let mut records = vec![record(0, "Acme Corp", "10", "")];
    recompute(&mut records, &book, None);
    assert_eq!(records[0].priority_reason, "primera");
}

#[test]
fn inactive_rules_are_skipped() {
    let mut book = RuleBook::default();
    book.settings = no_base();
    let mut r = rule(
        Priority::Alta,
        "apagada",
        "Vendor Name",
        Operator::Contains,
        "acme",
    );
    r.active = false;
    book.rules.push(r);

    let mut records = vec![record(0, "Acme Corp", "10", "")];
    recompute(&mut records, &book, None);
    assert_eq!(records[0].priority, None);
}

#[test]
fn all_conditions_must_match() {
    let mut book = RuleBook::default();
    book.settings = no_base();
    let mut r = rule(
        Priority::Alta,
        "caro y de acme",
        "Vendor Name",
        Operator::Contains,
        "acme",
    );
    r.conditions.push(Condition {
        column: "Amount".to_string(),
        operator: Operator::GreaterThan,
        value: "1000".to_string(),
    });
    book.rules.push(r);

    let mut records = vec![
        record(0, "Acme Corp", "$1,500.00", ""),
        record(1, "Acme Corp", "900", ""),
    ];
    recompute(&mut records, &book, None);
    assert_eq!(records[0].priority, Some(Priority::Alta));
    assert_eq!(records[1].priority, None);
}

#[test]
fn base_pay_group_pass_applies_when_enabled() {
    let book = RuleBook::default();

    let mut records = vec![
        record(0, "A", "1", "SCF"),
        record(1, "B", "1", "Intercompany"),
        record(2, "C", "1", "Pay Group 3"),
        record(3, "D", "1", "Weekly"),
    ];
    recompute(&mut records, &book, Some("Pay Group"));
    assert_eq!(records[0].priority, Some(Priority::Alta));
    assert_eq!(records[1].priority, Some(Priority::Alta));
    assert_eq!(records[2].priority, Some(Priority::Baja));
    assert_eq!(records[3].priority, Some(Priority::Media));

    let mut book = book;
    book.settings.enable_scf_intercompany = false;
    recompute(&mut records, &book, Some("Pay Group"));
    assert!(records.iter().all(|r| r.priority.is_none()));
}

#[test]
fn user_rules_override_the_base_pass() {
    let mut book = RuleBook::default();
    book.rules.push(rule(
        Priority::Baja,
        "scf no urgente",
        "Vendor Name",
        Operator::Equals,
        "A",
    ));

    let mut records = vec![record(0, "A", "1", "SCF")];
    recompute(&mut records, &book, Some("Pay Group"));
    assert_eq!(records[0].priority, Some(Priority::Baja));
    assert_eq!(records[0].priority_reason, "scf no urgente");
}

#[test]
fn filters_are_case_insensitive_substring_and_summary_covers_the_view() {
    let vendors = [
        "Amazon Web Services",
        "Globex",
        "AMAZON",
        "Initech",
        "amazon mx",
        "Umbrella",
        "Stark",
        "Wayne",
        "Hooli",
        "Pied Piper",
    ];
    let records: Vec<Record> = vendors
        .iter()
        .enumerate()
        .map(|(i, vendor)| record(i as u64, vendor, &format!("{}", (i + 1) * 100), ""))
        .collect();

    let filters = vec![Filter {
        column: "Vendor Name".to_string(),
        value: "Amazon".to_string(),
    }];
    let view = apply_filters(&records, &filters);
    assert_eq!(view.len(), 3);

    let summary = summarize(view.iter().copied(), Some("Amount"));
    assert_eq!(summary.count, 3);
    // Rows 0, 2, and 4 carry 100, 300, and 500.
    assert_eq!(summary.total_amount, 900.0);
    assert_eq!(summary.average_amount, 300.0);
}

#[test]
fn filtered_view_preserves_insertion_order() {
    let records = vec![
        record(0, "Acme", "1", ""),
        record(1, "Other", "1", ""),
        record(2, "Acme Sur", "1", ""),
    ];
    let filters = vec![Filter {
        column: "Vendor Name".to_string(),
        value: "acme".to_string(),
    }];
    let view = apply_filters(&records, &filters);
    let ids: Vec<u64> = view.iter().map(|r| r.row_id).collect();
    assert_eq!(ids, vec![0, 2]);
}

#[test]
fn group_by_aggregates_in_first_seen_order() {
    let records = vec![
        record(0, "Acme", "100", ""),
        record(1, "Globex", "50", ""),
        record(2, "Acme", "300", ""),
        record(3, "Globex", "abc", ""),
    ];
    let refs: Vec<&Record> = records.iter().collect();
    let groups = group_by(&refs, "Vendor Name", Some("Amount"));

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].key, "Acme");
    assert_eq!(groups[0].sum, 400.0);
    assert_eq!(groups[0].mean, 200.0);
    assert_eq!(groups[0].min, 100.0);
    assert_eq!(groups[0].max, 300.0);
    assert_eq!(groups[0].count, 2);

    // Non-numeric amounts still count rows, just not the aggregates.
    assert_eq!(groups[1].key, "Globex");
    assert_eq!(groups[1].count, 2);
    assert_eq!(groups[1].sum, 50.0);
}

#[test]
fn rule_book_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");

    let mut book = RuleBook::default();
    book.settings.enable_age_sort = false;
    let id = book.save_rule(Rule {
        id: String::new(),
        active: true,
        priority: Priority::Media,
        reason: "persistida".to_string(),
        conditions: vec![Condition {
            column: "Vendor Name".to_string(),
            operator: Operator::Contains,
            value: "x".to_string(),
        }],
    });
    book.save(&path).unwrap();

    let loaded = RuleBook::load(&path);
    assert_eq!(loaded.rules.len(), 1);
    assert_eq!(loaded.rules[0].id, id);
    assert_eq!(loaded.rules[0].reason, "persistida");
    assert!(!loaded.settings.enable_age_sort);
    assert!(loaded.settings.enable_scf_intercompany);
}

#[test]
fn toggling_and_deleting_rules_by_id() {
    let mut book = RuleBook::default();
    let id = book.save_rule(rule(
        Priority::Alta,
        "r",
        "Vendor Name",
        Operator::Contains,
        "x",
    ));

    assert!(book.toggle_rule(&id, false));
    assert!(!book.rules[0].active);
    assert!(!book.toggle_rule("missing", true));

    assert!(book.delete_rule(&id));
    assert!(book.rules.is_empty());
    assert!(!book.delete_rule(&id));
}
