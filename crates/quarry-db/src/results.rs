// crates/quarry-db/src/results.rs
// ============================================================================
// Module: Quarry Query Results
// Description: Row sets returned by read queries, with truncation metadata.
// Purpose: Present rows indexable by position and by column name.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`Results`] value owns the column names once (shared by every [`Row`])
//! and records whether rows were dropped by the read row cap.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use serde::ser::SerializeMap;

use crate::error::DatabaseError;
use crate::value::Value;

// ============================================================================
// SECTION: Row Indexing
// ============================================================================

/// Types usable to look up a cell in a [`Row`].
pub trait RowIndex {
    /// Resolves the cell position within `columns`.
    fn position(&self, columns: &[String]) -> Option<usize>;
}

impl RowIndex for usize {
    fn position(&self, columns: &[String]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }
}

impl RowIndex for &str {
    fn position(&self, columns: &[String]) -> Option<usize> {
        columns.iter().position(|column| column == self)
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column names shared with the owning result set.
    columns: Arc<[String]>,
    /// Cell values in column order.
    values: Vec<Value>,
}

impl Row {
    /// Creates a row; `values` must follow `columns` order.
    #[must_use]
    pub const fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self {
            columns,
            values,
        }
    }

    /// Returns the cell at a position or column name.
    ///
    /// Duplicate column names resolve to the first occurrence.
    pub fn get<I: RowIndex>(&self, index: I) -> Option<&Value> {
        index.position(&self.columns).and_then(|position| self.values.get(position))
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the cells in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row into its cells.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns the number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when the row has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Rows returned by a read query.
///
/// # Invariants
/// - Every row shares `columns`.
/// - `truncated` is true only when the row cap dropped at least one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Results {
    /// Column names in statement order.
    columns: Arc<[String]>,
    /// Returned rows.
    rows: Vec<Row>,
    /// Whether more rows existed than were returned.
    truncated: bool,
}

impl Results {
    /// Creates a result set.
    #[must_use]
    pub const fn new(columns: Arc<[String]>, rows: Vec<Row>, truncated: bool) -> Self {
        Self {
            columns,
            rows,
            truncated,
        }
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the rows.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consumes the result set into its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Returns whether rows were dropped by the row cap.
    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.truncated
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when no rows were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the first row, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Iterates the rows.
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Returns the only cell of a one-row, one-column result.
    ///
    /// An empty result yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::MultipleValues`] when more than one row or
    /// column was returned.
    pub fn single_value(&self) -> Result<Option<&Value>, DatabaseError> {
        match self.rows.as_slice() {
            [] => Ok(None),
            [row] if row.len() == 1 => Ok(row.get(0)),
            rows => Err(DatabaseError::MultipleValues {
                rows: rows.len(),
                columns: self.columns.len(),
            }),
        }
    }

    /// Returns each row as a JSON object keyed by column name.
    #[must_use]
    pub fn dicts(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                row.columns
                    .iter()
                    .zip(&row.values)
                    .map(|(column, value)| (column.clone(), value.to_json()))
                    .collect()
            })
            .collect()
    }

    /// Collects one column (by position or name) across all rows.
    pub fn column_values<I: RowIndex + Copy>(&self, index: I) -> Vec<Value> {
        self.rows.iter().filter_map(|row| row.get(index).cloned()).collect()
    }
}

impl<'a> IntoIterator for &'a Results {
    type IntoIter = std::slice::Iter<'a, Row>;
    type Item = &'a Row;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test fixtures use explicit asserts and unwraps for clarity."
    )]

    use std::sync::Arc;

    use super::Results;
    use super::Row;
    use crate::error::DatabaseError;
    use crate::value::Value;

    fn results(columns: &[&str], rows: Vec<Vec<Value>>) -> Results {
        let columns: Arc<[String]> = columns.iter().map(|name| (*name).to_string()).collect();
        let rows = rows.into_iter().map(|values| Row::new(Arc::clone(&columns), values)).collect();
        Results::new(columns, rows, false)
    }

    #[test]
    fn rows_index_by_position_and_name() {
        let set = results(&["id", "v"], vec![vec![Value::Integer(1), Value::from("a")]]);
        let row = set.first().unwrap();
        assert_eq!(row.get(0), Some(&Value::Integer(1)));
        assert_eq!(row.get("v"), Some(&Value::from("a")));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.get(2), None);
    }

    #[test]
    fn single_value_rejects_wide_results() {
        let set = results(&["a", "b"], vec![vec![Value::Integer(1), Value::Integer(2)]]);
        assert!(matches!(
            set.single_value(),
            Err(DatabaseError::MultipleValues {
                rows: 1,
                columns: 2
            })
        ));
        let empty = results(&["a"], Vec::new());
        assert_eq!(empty.single_value().unwrap(), None);
    }

    #[test]
    fn dicts_key_cells_by_column() {
        let set = results(&["id", "score"], vec![vec![Value::Integer(3), Value::Real(1.5)]]);
        let dicts = set.dicts();
        assert_eq!(dicts.len(), 1);
        assert_eq!(dicts[0].get("score"), Some(&serde_json::json!(1.5)));
    }

    #[test]
    fn rows_serialize_as_column_maps() {
        let set = results(&["id", "v"], vec![vec![Value::Integer(7), Value::Null]]);
        let json = serde_json::to_value(set.first().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"id": 7, "v": null}));
    }
}
