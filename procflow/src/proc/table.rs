//! Tabular data flowing between processes.
//!
//! A [`DataTable`] holds one row per job. Start processes receive a table
//! built by the caller; other processes receive the output tables of their
//! upstream processes, concatenated column-wise.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::ProcflowError;

/// An ordered table of JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl DataTable {
    /// Creates an empty table with the given columns.
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Creates a table from rows; short rows are padded with nulls, long rows truncated.
    #[must_use]
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Creates a single-column table.
    #[must_use]
    pub fn from_values<V: Into<Value>>(column: impl Into<String>, values: Vec<V>) -> Self {
        Self {
            columns: vec![column.into()],
            rows: values.into_iter().map(|v| vec![v.into()]).collect(),
        }
    }

    /// Creates a single-column table of paths matching a glob pattern, sorted.
    pub fn from_glob(column: impl Into<String>, pattern: &str) -> Result<Self, ProcflowError> {
        let paths = glob::glob(pattern)
            .map_err(|e| ProcflowError::Config(format!("Invalid glob pattern '{pattern}': {e}")))?;
        let mut found: Vec<String> = paths
            .filter_map(std::result::Result::ok)
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        found.sort();
        Ok(Self::from_values(column, found))
    }

    /// Creates a table with one row of nulls, the data of a start process without input.
    #[must_use]
    pub fn single_null_row(ncols: usize) -> Self {
        let columns = (0..ncols).map(|i| i.to_string()).collect();
        Self {
            columns,
            rows: vec![vec![Value::Null; ncols]],
        }
    }

    /// Appends a row, padding or truncating it to the column count.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns a cell.
    #[must_use]
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col)
    }

    /// Returns all values of a column.
    #[must_use]
    pub fn column(&self, column: &str) -> Option<Vec<&Value>> {
        let col = self.columns.iter().position(|c| c == column)?;
        Some(self.rows.iter().map(|r| &r[col]).collect())
    }

    /// Concatenates tables column-wise.
    ///
    /// The result has as many rows as the longest table. Shorter tables are
    /// padded by repeating their last row, or with nulls if they are empty.
    #[must_use]
    pub fn concat_columns(tables: &[&Self]) -> Self {
        let nrows = tables.iter().map(|t| t.nrows()).max().unwrap_or(0);
        let columns = tables.iter().flat_map(|t| t.columns.clone()).collect();
        let rows = (0..nrows)
            .map(|i| {
                tables
                    .iter()
                    .flat_map(|t| match t.rows.get(i).or_else(|| t.rows.last()) {
                        Some(row) => row.clone(),
                        None => vec![Value::Null; t.ncols()],
                    })
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Renames duplicate columns to `name_1`, `name_2`, ... keeping the first as-is.
    pub fn make_columns_unique(&mut self) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for col in &mut self.columns {
            let count = counts.entry(col.clone()).or_insert(0);
            if *count > 0 {
                *col = format!("{col}_{count}");
            }
            *count += 1;
        }
    }

    /// Selects columns by name, in the given order; unknown names become null columns.
    #[must_use]
    pub fn select(&self, columns: &[(String, Option<String>)]) -> Self {
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|(_, source)| {
                source
                    .as_ref()
                    .and_then(|s| self.columns.iter().position(|c| c == s))
            })
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|p| p.map_or(Value::Null, |i| row[i].clone()))
                    .collect()
            })
            .collect();
        Self {
            columns: columns.iter().map(|(name, _)| name.clone()).collect(),
            rows,
        }
    }
}

/// How declared input keys were matched against data columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMatch {
    /// `(input key, source column)`; `None` means no column is available.
    pub mapping: Vec<(String, Option<String>)>,
    /// Data columns nothing consumed.
    pub wasted: Vec<String>,
    /// Input keys that receive null.
    pub missing: Vec<String>,
}

/// Matches declared input keys to table columns.
///
/// Columns named like a key feed that key. Remaining keys take the remaining
/// columns positionally. Extra columns are wasted; keys left over get null.
#[must_use]
pub fn match_columns(keys: &[String], columns: &[String]) -> ColumnMatch {
    let rest: Vec<&String> = columns.iter().filter(|c| !keys.contains(c)).collect();
    let mut rest_iter = rest.iter();

    let mut result = ColumnMatch::default();
    for key in keys {
        if columns.contains(key) {
            result.mapping.push((key.clone(), Some(key.clone())));
        } else if let Some(col) = rest_iter.next() {
            result.mapping.push((key.clone(), Some((*col).clone())));
        } else {
            result.mapping.push((key.clone(), None));
            result.missing.push(key.clone());
        }
    }
    result.wasted = rest_iter.map(|c| (*c).clone()).collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_from_values() {
        let table = DataTable::from_values("a", vec![1, 2, 3]);
        assert_eq!(table.nrows(), 3);
        assert_eq!(table.get(1, "a"), Some(&json!(2)));
    }

    #[test]
    fn test_from_rows_pads() {
        let table = DataTable::from_rows(cols(&["a", "b"]), vec![vec![json!(1)]]);
        assert_eq!(table.rows()[0], vec![json!(1), Value::Null]);
    }

    #[test]
    fn test_single_null_row() {
        let table = DataTable::single_null_row(2);
        assert_eq!(table.nrows(), 1);
        assert_eq!(table.rows()[0], vec![Value::Null, Value::Null]);
    }

    #[test]
    fn test_concat_forward_fills_short_tables() {
        let a = DataTable::from_values("a", vec![1, 2, 3]);
        let b = DataTable::from_values("b", vec!["x"]);
        let joined = DataTable::concat_columns(&[&a, &b]);
        assert_eq!(joined.columns(), &cols(&["a", "b"]));
        assert_eq!(joined.nrows(), 3);
        assert_eq!(joined.get(2, "b"), Some(&json!("x")));
    }

    #[test]
    fn test_concat_empty_table_gives_nulls() {
        let a = DataTable::from_values("a", vec![1, 2]);
        let b = DataTable::new(cols(&["b"]));
        let joined = DataTable::concat_columns(&[&a, &b]);
        assert_eq!(joined.get(1, "b"), Some(&Value::Null));
    }

    #[test]
    fn test_make_columns_unique() {
        let mut table = DataTable::new(cols(&["o", "o", "x", "o"]));
        table.make_columns_unique();
        assert_eq!(table.columns(), &cols(&["o", "o_1", "x", "o_2"]));
    }

    #[test]
    fn test_match_columns_by_name_then_position() {
        let m = match_columns(&cols(&["b", "a"]), &cols(&["x", "a"]));
        assert_eq!(
            m.mapping,
            vec![
                ("b".to_string(), Some("x".to_string())),
                ("a".to_string(), Some("a".to_string())),
            ]
        );
        assert!(m.wasted.is_empty());
        assert!(m.missing.is_empty());
    }

    #[test]
    fn test_match_columns_reports_waste_and_missing() {
        let m = match_columns(&cols(&["a"]), &cols(&["x", "y"]));
        assert_eq!(m.wasted, cols(&["y"]));

        let m = match_columns(&cols(&["a", "b"]), &cols(&["x"]));
        assert_eq!(m.missing, cols(&["b"]));
        assert_eq!(m.mapping[1], ("b".to_string(), None));
    }

    #[test]
    fn test_select_renames_and_fills() {
        let table = DataTable::from_rows(cols(&["x", "y"]), vec![vec![json!(1), json!(2)]]);
        let selected = table.select(&[
            ("b".to_string(), Some("y".to_string())),
            ("c".to_string(), None),
        ]);
        assert_eq!(selected.columns(), &cols(&["b", "c"]));
        assert_eq!(selected.rows()[0], vec![json!(2), Value::Null]);
    }

    #[test]
    fn test_from_glob_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join("c.log"), "").unwrap();
        let pattern = format!("{}/*.txt", dir.path().display());
        let table = DataTable::from_glob("infile", &pattern).unwrap();
        assert_eq!(table.nrows(), 2);
        let first = table.get(0, "infile").unwrap().as_str().unwrap();
        assert!(first.ends_with("a.txt"));
    }
}
