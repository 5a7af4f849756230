use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::errors::WorkbenchError;
use crate::record::Record;

/// Per-column suggestion lists for the grid's editors.
///
/// Lists are seeded from the upload, learn every new value a user types into
/// a column, and can be edited or bulk-imported independently. They persist
/// to a JSON file so they survive re-uploads and new sessions.
#[derive(Clone, Debug, Default)]
pub struct AutocompleteLists {
    lists: BTreeMap<String, BTreeSet<String>>,
}

impl AutocompleteLists {
    pub fn new() -> Self {
        AutocompleteLists::default()
    }

    pub fn load(path: &Path) -> Self {
        let lists = fs::read_to_string(path)
            .ok()
            .and_then(|data| serde_json::from_str::<BTreeMap<String, Vec<String>>>(&data).ok())
            .map(|raw| {
                raw.into_iter()
                    .map(|(col, values)| (col, values.into_iter().collect()))
                    .collect()
            })
            .unwrap_or_default();
        AutocompleteLists { lists }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw: BTreeMap<&String, Vec<&String>> = self
            .lists
            .iter()
            .map(|(col, values)| (col, values.iter().collect()))
            .collect();
        let json = serde_json::to_string_pretty(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    fn keep(value: &str) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == "nan" || trimmed == "None" {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Merge every text value present in the dataset into the lists.
    pub fn seed_from_records(&mut self, records: &[Record]) {
        for record in records {
            for (column, value) in &record.fields {
                if let Some(v) = Self::keep(&value.display()) {
                    self.lists.entry(column.clone()).or_default().insert(v);
                }
            }
        }
    }

    /// Remember a value the user just typed into a column.
    pub fn learn(&mut self, column: &str, value: &str) {
        if let Some(v) = Self::keep(value) {
            self.lists.entry(column.to_string()).or_default().insert(v);
        }
    }

    /// Pull every distinct value of one column into its list. Errors when the
    /// column has nothing usable.
    pub fn import_column(
        &mut self,
        records: &[Record],
        column: &str,
    ) -> Result<usize, WorkbenchError> {
        let mut imported = 0usize;
        for record in records {
            if let Some(value) = record.get(column) {
                if let Some(v) = Self::keep(&value.display()) {
                    if self.lists.entry(column.to_string()).or_default().insert(v) {
                        imported += 1;
                    }
                }
            }
        }
        if imported == 0 {
            return Err(WorkbenchError::invalid(format!(
                "column '{column}' has no values to import"
            )));
        }
        Ok(imported)
    }

    /// Overwrite everything with client-edited lists.
    pub fn replace_all(&mut self, lists: BTreeMap<String, Vec<String>>) {
        self.lists = lists
            .into_iter()
            .map(|(col, values)| {
                (
                    col,
                    values.iter().filter_map(|v| Self::keep(v)).collect(),
                )
            })
            .collect();
    }

    /// Sorted options per column, as the client consumes them.
    pub fn options(&self) -> BTreeMap<String, Vec<String>> {
        self.lists
            .iter()
            .map(|(col, values)| (col.clone(), values.iter().cloned().collect()))
            .collect()
    }
}
