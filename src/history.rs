use serde::Serialize;

use crate::record::{Column, Record, Value};

/// Maximum number of undoable operations retained per session. Pushing past
/// this evicts the oldest entry silently; its mutation becomes permanent.
pub const MAX_UNDO_DEPTH: usize = 15;

/// A reversible snapshot captured by the mutation engine just before a write.
///
/// Each variant stores the minimal pre-mutation state needed to restore the
/// staging layer exactly, including row ordering: deleted rows carry the index
/// they occupied, bulk deletions carry one index per row.
#[derive(Clone, Debug)]
pub enum UndoEntry {
    CellEdit {
        row_id: u64,
        column: String,
        old_value: Value,
    },
    RowAdd {
        row_id: u64,
    },
    RowDelete {
        row_id: u64,
        original_index: usize,
        record: Record,
    },
    BulkEdit {
        column: String,
        changes: Vec<(u64, Value)>,
    },
    BulkDelete {
        /// (original_index, record) pairs in ascending index order.
        rows: Vec<(usize, Record)>,
    },
    ColumnDelete {
        column: Column,
        position: usize,
        values: Vec<(u64, Value)>,
    },
}

impl UndoEntry {
    /// Human-readable label used by the audit trail.
    pub fn label(&self) -> &'static str {
        match self {
            UndoEntry::CellEdit { .. } => "cell_edit",
            UndoEntry::RowAdd { .. } => "row_add",
            UndoEntry::RowDelete { .. } => "row_delete",
            UndoEntry::BulkEdit { .. } => "bulk_edit",
            UndoEntry::BulkDelete { .. } => "bulk_delete",
            UndoEntry::ColumnDelete { .. } => "column_delete",
        }
    }
}

/// Which rows an undo touched, so the client can focus the view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Affected {
    Row(u64),
    /// Sentinel for operations spanning several rows.
    Bulk(&'static str),
}

impl Affected {
    pub fn bulk() -> Self {
        Affected::Bulk("bulk")
    }
}

/// Bounded LIFO stack of undo entries.
///
/// Entries leave the stack only through [`History::pop`] (undo) or
/// [`History::clear`] (commit). Overflow evicts the oldest entry without
/// error: the history is a sliding window, not a hard limit.
#[derive(Default)]
pub struct History {
    entries: Vec<UndoEntry>,
}

impl History {
    pub fn new() -> Self {
        History::default()
    }

    pub fn push(&mut self, entry: UndoEntry) {
        if self.entries.len() >= MAX_UNDO_DEPTH {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<UndoEntry> {
        self.entries.pop()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
