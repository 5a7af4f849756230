use chrono::NaiveDate;
use std::collections::HashSet;

use crate::analytics::{find_amount_column, summarize, Summary};
use crate::errors::WorkbenchError;
use crate::history::{Affected, History, UndoEntry};
use crate::record::{Column, ColumnKind, Record, Value};
use crate::rules::{recompute, RuleBook};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];

fn is_valid_date(text: &str) -> bool {
    DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(text, fmt).is_ok())
}

/// What a mutation did, returned to the caller so the client can refresh
/// without a second round trip.
#[derive(Clone, Debug)]
pub struct MutationReport {
    /// Rows actually modified. Zero means the operation was a no-op and
    /// pushed nothing onto the history.
    pub changed: usize,
    pub affected: Option<Affected>,
    pub history_len: usize,
    pub summary: Summary,
}

/// The mutable working copy of one uploaded dataset.
///
/// Every write funnels through the methods below: each validates its inputs
/// before touching anything, captures a reversible snapshot of the
/// pre-mutation state, applies the change, pushes the snapshot onto the undo
/// history, and recomputes derived state. An operation either fully applies
/// or fails before the first write.
pub struct Staging {
    columns: Vec<Column>,
    records: Vec<Record>,
    history: History,
    next_row_id: u64,
    pay_group_column: Option<String>,
}

impl Staging {
    pub fn new(
        columns: Vec<Column>,
        records: Vec<Record>,
        pay_group_column: Option<String>,
        book: &RuleBook,
    ) -> Self {
        let next_row_id = records.iter().map(|r| r.row_id + 1).max().unwrap_or(0);
        let mut staging = Staging {
            columns,
            records,
            history: History::new(),
            next_row_id,
            pay_group_column,
        };
        staging.recompute_derived(book);
        staging
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, row_id: u64) -> Option<&Record> {
        self.records.iter().find(|r| r.row_id == row_id)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn pay_group_column(&self) -> Option<&str> {
        self.pay_group_column.as_deref()
    }

    pub fn amount_column(&self) -> Option<&str> {
        find_amount_column(&self.columns)
    }

    fn position(&self, row_id: u64) -> Option<usize> {
        self.records.iter().position(|r| r.row_id == row_id)
    }

    fn require_column(&self, name: &str) -> Result<&Column, WorkbenchError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| WorkbenchError::not_found(format!("column '{name}'")))
    }

    /// Recompute priorities over all records and summarize the full view.
    /// Runs after every mutation, undo included.
    pub fn recompute_derived(&mut self, book: &RuleBook) -> Summary {
        recompute(&mut self.records, book, self.pay_group_column.as_deref());
        summarize(self.records.iter(), self.amount_column())
    }

    fn report(&mut self, book: &RuleBook, changed: usize, affected: Option<Affected>) -> MutationReport {
        let summary = self.recompute_derived(book);
        MutationReport {
            changed,
            affected,
            history_len: self.history.len(),
            summary,
        }
    }

    fn no_change(&self) -> MutationReport {
        MutationReport {
            changed: 0,
            affected: None,
            history_len: self.history.len(),
            summary: summarize(self.records.iter(), self.amount_column()),
        }
    }

    /// Guard against clearing or mangling a typed date cell: a non-empty
    /// replacement must parse as a date, the empty string explicitly means
    /// "no date".
    fn validate_for_column(&self, column: &Column, value: &Value) -> Result<(), WorkbenchError> {
        if column.kind == ColumnKind::Date && !value.is_empty() {
            let text = value.display();
            if !is_valid_date(text.trim()) {
                return Err(WorkbenchError::invalid(format!(
                    "'{}' is not a valid date for column '{}'",
                    text, column.name
                )));
            }
        }
        Ok(())
    }

    /// Update one cell. No-op (and no history entry) when the value is
    /// unchanged.
    pub fn edit_cell(
        &mut self,
        book: &RuleBook,
        row_id: u64,
        column: &str,
        new_value: Value,
    ) -> Result<MutationReport, WorkbenchError> {
        let col = self.require_column(column)?.clone();
        self.validate_for_column(&col, &new_value)?;
        let index = self
            .position(row_id)
            .ok_or_else(|| WorkbenchError::not_found(format!("row {row_id}")))?;

        let old_value = self.records[index]
            .get(column)
            .cloned()
            .unwrap_or_else(Value::empty);
        if old_value == new_value {
            return Ok(self.no_change());
        }

        self.history.push(UndoEntry::CellEdit {
            row_id,
            column: column.to_string(),
            old_value,
        });
        self.records[index].set(column, new_value);
        Ok(self.report(book, 1, Some(Affected::Row(row_id))))
    }

    /// Append an empty row with a freshly allocated `row_id`. Ids are
    /// monotonic and never reused, even after the highest row is deleted.
    pub fn add_row(&mut self, book: &RuleBook) -> (u64, MutationReport) {
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.records.push(Record::blank(row_id, &self.columns));
        self.history.push(UndoEntry::RowAdd { row_id });
        let report = self.report(book, 1, Some(Affected::Row(row_id)));
        (row_id, report)
    }

    /// Remove one row, remembering its position so undo restores it exactly
    /// where it was.
    pub fn delete_row(
        &mut self,
        book: &RuleBook,
        row_id: u64,
    ) -> Result<MutationReport, WorkbenchError> {
        let index = self
            .position(row_id)
            .ok_or_else(|| WorkbenchError::not_found(format!("row {row_id}")))?;
        let record = self.records.remove(index);
        self.history.push(UndoEntry::RowDelete {
            row_id,
            original_index: index,
            record,
        });
        Ok(self.report(book, 1, Some(Affected::Row(row_id))))
    }

    /// Write the same value into one column across many rows as a single
    /// undoable unit. Absent row ids are skipped, unchanged cells are not
    /// recorded, and a batch that changes nothing pushes no history.
    pub fn bulk_edit(
        &mut self,
        book: &RuleBook,
        row_ids: &[u64],
        column: &str,
        new_value: Value,
    ) -> Result<MutationReport, WorkbenchError> {
        let col = self.require_column(column)?.clone();
        self.validate_for_column(&col, &new_value)?;
        let targets: HashSet<u64> = row_ids.iter().copied().collect();

        let mut changes: Vec<(usize, u64, Value)> = Vec::new();
        for (index, record) in self.records.iter().enumerate() {
            if !targets.contains(&record.row_id) {
                continue;
            }
            let old = record.get(column).cloned().unwrap_or_else(Value::empty);
            if old != new_value {
                changes.push((index, record.row_id, old));
            }
        }
        if changes.is_empty() {
            return Ok(self.no_change());
        }

        let changed = changes.len();
        for (index, _, _) in &changes {
            self.records[*index].set(column, new_value.clone());
        }
        self.history.push(UndoEntry::BulkEdit {
            column: column.to_string(),
            changes: changes
                .into_iter()
                .map(|(_, row_id, old)| (row_id, old))
                .collect(),
        });
        Ok(self.report(book, changed, Some(Affected::bulk())))
    }

    /// Substring find/replace within one column of the selected rows, as a
    /// single undoable unit.
    pub fn find_replace_in_selection(
        &mut self,
        book: &RuleBook,
        row_ids: &[u64],
        column: &str,
        find_text: &str,
        replace_text: &str,
    ) -> Result<MutationReport, WorkbenchError> {
        if find_text.is_empty() {
            return Err(WorkbenchError::invalid("find text must not be empty"));
        }
        self.require_column(column)?;
        let targets: HashSet<u64> = row_ids.iter().copied().collect();

        let mut changes: Vec<(usize, u64, Value, Value)> = Vec::new();
        for (index, record) in self.records.iter().enumerate() {
            if !targets.contains(&record.row_id) {
                continue;
            }
            let old = record.get(column).cloned().unwrap_or_else(Value::empty);
            let text = old.display();
            if text.contains(find_text) {
                let replaced = Value::Text(text.replace(find_text, replace_text));
                if replaced != old {
                    changes.push((index, record.row_id, old, replaced));
                }
            }
        }
        if changes.is_empty() {
            return Ok(self.no_change());
        }

        let count = changes.len();
        let mut recorded = Vec::with_capacity(count);
        for (index, row_id, old, new) in changes {
            self.records[index].set(column, new);
            recorded.push((row_id, old));
        }
        self.history.push(UndoEntry::BulkEdit {
            column: column.to_string(),
            changes: recorded,
        });
        Ok(self.report(book, count, Some(Affected::bulk())))
    }

    /// Delete many rows as one undoable unit, remembering each row's own
    /// original index for exact restoration. Absent ids are skipped.
    pub fn bulk_delete_rows(&mut self, book: &RuleBook, row_ids: &[u64]) -> MutationReport {
        let targets: HashSet<u64> = row_ids.iter().copied().collect();
        let mut doomed: Vec<(usize, Record)> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| targets.contains(&r.row_id))
            .map(|(i, r)| (i, r.clone()))
            .collect();
        if doomed.is_empty() {
            return self.no_change();
        }

        for (index, _) in doomed.iter().rev() {
            self.records.remove(*index);
        }
        doomed.sort_by_key(|(index, _)| *index);
        let count = doomed.len();
        self.history.push(UndoEntry::BulkDelete { rows: doomed });
        self.report(book, count, Some(Affected::bulk()))
    }

    /// Drop a column from the schema and every row, keeping enough state to
    /// put it back.
    pub fn delete_column(
        &mut self,
        book: &RuleBook,
        name: &str,
    ) -> Result<MutationReport, WorkbenchError> {
        let position = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| WorkbenchError::not_found(format!("column '{name}'")))?;

        let column = self.columns.remove(position);
        let mut values = Vec::with_capacity(self.records.len());
        for record in &mut self.records {
            let old = record
                .fields
                .remove(name)
                .unwrap_or_else(Value::empty);
            record.refresh_status();
            values.push((record.row_id, old));
        }
        let count = values.len();
        self.history.push(UndoEntry::ColumnDelete {
            column,
            position,
            values,
        });
        Ok(self.report(book, count, Some(Affected::bulk())))
    }

    /// Reverse the most recent mutation. An empty history is a benign no-op
    /// reported back as zero entries, never an error.
    pub fn undo(&mut self, book: &RuleBook) -> MutationReport {
        let Some(entry) = self.history.pop() else {
            return self.no_change();
        };
        log::debug!("undoing {}", entry.label());

        let affected = match entry {
            UndoEntry::CellEdit {
                row_id,
                column,
                old_value,
            } => {
                if let Some(index) = self.position(row_id) {
                    self.records[index].set(&column, old_value);
                }
                Affected::Row(row_id)
            }
            UndoEntry::RowAdd { row_id } => {
                self.records.retain(|r| r.row_id != row_id);
                Affected::Row(row_id)
            }
            UndoEntry::RowDelete {
                row_id,
                original_index,
                record,
            } => {
                let index = original_index.min(self.records.len());
                self.records.insert(index, record);
                Affected::Row(row_id)
            }
            UndoEntry::BulkEdit { column, changes } => {
                for (row_id, old_value) in changes {
                    if let Some(index) = self.position(row_id) {
                        self.records[index].set(&column, old_value);
                    }
                }
                Affected::bulk()
            }
            UndoEntry::BulkDelete { rows } => {
                // Ascending original indices: earlier insertions shift the
                // later ones into place.
                for (original_index, record) in rows {
                    let index = original_index.min(self.records.len());
                    self.records.insert(index, record);
                }
                Affected::bulk()
            }
            UndoEntry::ColumnDelete {
                column,
                position,
                values,
            } => {
                let name = column.name.clone();
                let index = position.min(self.columns.len());
                self.columns.insert(index, column);
                for (row_id, old_value) in values {
                    if let Some(index) = self.position(row_id) {
                        self.records[index].set(&name, old_value);
                    }
                }
                Affected::bulk()
            }
        };

        self.report(book, 1, Some(affected))
    }

    /// Make the current staging content the new baseline: clears the undo
    /// history. A no-op when there is nothing to commit.
    pub fn commit(&mut self) -> bool {
        if self.history.is_empty() {
            return false;
        }
        self.history.clear();
        true
    }
}
