//! Materialized query results

use serde::Serialize;
use serde_json::Value;

use crate::ExecutionError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableColumn {
    pub name: String,
    pub values: Vec<Value>,
}

/// Column-oriented result set
///
/// Every column holds exactly `row_count` values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<TableColumn>,
    row_count: usize,
}

impl Table {
    /// Pivot row-major values into columns, rejecting ragged rows
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, ExecutionError> {
        let width = names.len();
        let row_count = rows.len();

        let mut columns: Vec<TableColumn> = names
            .into_iter()
            .map(|name| TableColumn {
                name,
                values: Vec::with_capacity(row_count),
            })
            .collect();

        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(ExecutionError::ShapeMismatch {
                    row: idx,
                    expected: width,
                    actual: row.len(),
                });
            }
            for (col, value) in columns.iter_mut().zip(row) {
                col.values.push(value);
            }
        }

        Ok(Self { columns, row_count })
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Values of row `idx` in column order
    pub fn row(&self, idx: usize) -> Option<Vec<&Value>> {
        if idx >= self.row_count {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[idx]).collect())
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.row_count).filter_map(move |idx| self.row(idx))
    }
}
