//! In-memory column table: the storage model for input and destination CSVs.
//!
//! Columns may have different lengths (a loop's branches rarely do).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnTable {
    columns: Vec<Column>,
}

/// Header comparison key: trimmed, BOM stripped, case-insensitive.
pub(crate) fn normalize_header_name(name: &str) -> String {
    // Spreadsheet tools sometimes emit a BOM before the first header.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

impl ColumnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Length of the longest column.
    pub fn row_count(&self) -> usize {
        self.columns.iter().map(|c| c.values.len()).max().unwrap_or(0)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        let key = normalize_header_name(name);
        self.columns
            .iter()
            .position(|c| normalize_header_name(&c.name) == key)
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.index_of(name).map(|i| self.columns[i].values.as_slice())
    }

    pub fn column_at(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Replace the named column, or append it if it does not exist.
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) {
        match self.index_of(name) {
            Some(i) => self.columns[i].values = values,
            None => self.columns.push(Column {
                name: name.to_string(),
                values,
            }),
        }
    }
}
