//! Time-indexed column store
//!
//! A [`TimeTable`] holds one `timestamp` index (whole epoch seconds) and any
//! number of named numeric columns. Missing samples are `None`; values are
//! always finite. Every node in the topology carries its raw telemetry and
//! derived utilization/saturation series in this form.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Epoch timestamp in whole seconds.
pub type Timestamp = i64;

/// Name of the time index when a table is written out.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Round a (possibly fractional) epoch value to the nearest whole second,
/// halves going to the even neighbour.
pub fn round_timestamp(ts: f64) -> Timestamp {
    ts.round_ties_even() as Timestamp
}

/// A named column of nullable samples, aligned with the table index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Time-indexed collection of named numeric columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeTable {
    index: Vec<Timestamp>,
    columns: Vec<Column>,
}

impl TimeTable {
    /// Create an empty table (no rows, no columns)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the given index and no metric columns
    pub fn with_index(index: Vec<Timestamp>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    /// Create a single-column table
    pub fn from_series(
        name: impl Into<String>,
        index: Vec<Timestamp>,
        values: Vec<Option<f64>>,
    ) -> Self {
        let mut table = Self::with_index(index);
        table.set_column(name, values);
        table
    }

    /// Create a single-column table from `(timestamp, value)` samples whose
    /// timestamps may be fractional
    pub fn from_samples(name: impl Into<String>, samples: &[(f64, Option<f64>)]) -> Self {
        let index = samples.iter().map(|(ts, _)| round_timestamp(*ts)).collect();
        let values = samples.iter().map(|(_, v)| finite(*v)).collect();
        Self::from_series(name, index, values)
    }

    pub fn index(&self) -> &[Timestamp] {
        &self.index
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// A table without rows is empty, whatever its columns
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether the table carries at least one metric column besides the index
    pub fn has_metrics(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Value of `name` at row `row`
    pub fn value(&self, name: &str, row: usize) -> Option<f64> {
        self.column(name).and_then(|values| values.get(row).copied().flatten())
    }

    /// Value of `name` at the first row indexed by `ts`
    pub fn value_at(&self, name: &str, ts: Timestamp) -> Option<f64> {
        let row = self.index.iter().position(|t| *t == ts)?;
        self.value(name, row)
    }

    /// Insert or replace a column. The values are padded or truncated to the
    /// index length; non-finite values become missing.
    pub fn set_column(&mut self, name: impl Into<String>, mut values: Vec<Option<f64>>) {
        let name = name.into();
        values.resize(self.index.len(), None);
        let values = values.into_iter().map(finite).collect();
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(column) => column.values = values,
            None => self.columns.push(Column { name, values }),
        }
    }

    /// Keep only the named columns (in the requested order)
    pub fn select(&self, names: &[&str]) -> TimeTable {
        let columns = names
            .iter()
            .filter_map(|name| self.columns.iter().find(|c| c.name == *name).cloned())
            .collect();
        TimeTable {
            index: self.index.clone(),
            columns,
        }
    }

    /// Replace missing samples in every column with `value`
    pub fn fill_missing(&self, value: f64) -> TimeTable {
        self.map_values(|v| Some(v.unwrap_or(value)))
    }

    /// Apply `f` to every sample of every column
    pub fn map_values(&self, f: impl Fn(Option<f64>) -> Option<f64>) -> TimeTable {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: c.values.iter().map(|v| finite(f(*v))).collect(),
            })
            .collect();
        TimeTable {
            index: self.index.clone(),
            columns,
        }
    }

    /// Rename every column with `f`
    pub fn rename_columns(&self, f: impl Fn(&str) -> String) -> TimeTable {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: f(&c.name),
                values: c.values.clone(),
            })
            .collect();
        TimeTable {
            index: self.index.clone(),
            columns,
        }
    }

    /// Stable sort of all rows by timestamp
    pub fn sorted(&self) -> TimeTable {
        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.sort_by_key(|&row| self.index[row]);
        self.take_rows(&order)
    }

    /// Keep the first row of every repeated timestamp
    pub fn dedup_timestamps(&self) -> TimeTable {
        let mut seen = BTreeSet::new();
        let rows: Vec<usize> = (0..self.index.len())
            .filter(|&row| seen.insert(self.index[row]))
            .collect();
        self.take_rows(&rows)
    }

    /// First difference of every column over time.
    ///
    /// Rows are sorted by timestamp first. The first row has no predecessor
    /// and is missing, as is any row where either operand is missing.
    pub fn first_difference(&self) -> TimeTable {
        let sorted = self.sorted();
        let columns = sorted
            .columns
            .iter()
            .map(|c| {
                let values = (0..c.values.len())
                    .map(|row| {
                        if row == 0 {
                            return None;
                        }
                        match (c.values[row], c.values[row - 1]) {
                            (Some(cur), Some(prev)) => Some(cur - prev),
                            _ => None,
                        }
                    })
                    .collect();
                Column {
                    name: c.name.clone(),
                    values,
                }
            })
            .collect();
        TimeTable {
            index: sorted.index,
            columns,
        }
    }

    /// Outer join on timestamp.
    ///
    /// The result index is the sorted union of both indexes. Columns of
    /// `other` replace same-named columns of `self`. When a side repeats a
    /// timestamp, its first row for that timestamp is used.
    pub fn outer_join(&self, other: &TimeTable) -> TimeTable {
        let index: Vec<Timestamp> = self
            .index
            .iter()
            .chain(other.index.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let left = first_rows(&self.index);
        let right = first_rows(&other.index);

        let mut result = TimeTable::with_index(index.clone());
        for column in &self.columns {
            if other.contains(&column.name) {
                continue;
            }
            result.columns.push(realign(column, &left, &index));
        }
        for column in &other.columns {
            result.columns.push(realign(column, &right, &index));
        }
        result
    }

    /// Elementwise sum of column `name` in both tables over the union of
    /// their indexes, treating missing samples as zero. A table that lacks
    /// the column contributes nothing.
    pub fn outer_add(&self, other: &TimeTable, name: &str) -> TimeTable {
        let mut left = self.select(&[name]);
        if !left.has_metrics() {
            left.set_column(name, Vec::new());
        }
        let mut right = other.select(&[name]).rename_columns(|_| ADDEND.to_string());
        if !right.has_metrics() {
            right.set_column(ADDEND, Vec::new());
        }

        let joined = left.outer_join(&right);
        let (Some(a), Some(b)) = (joined.column(name), joined.column(ADDEND)) else {
            return joined;
        };
        let sum = a
            .iter()
            .zip(b)
            .map(|(a, b)| Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)))
            .collect();
        TimeTable::from_series(name, joined.index.clone(), sum)
    }

    fn take_rows(&self, rows: &[usize]) -> TimeTable {
        TimeTable {
            index: rows.iter().map(|&row| self.index[row]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: rows.iter().map(|&row| c.values[row]).collect(),
                })
                .collect(),
        }
    }
}

const ADDEND: &str = "__addend";

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn first_rows(index: &[Timestamp]) -> HashMap<Timestamp, usize> {
    let mut rows = HashMap::with_capacity(index.len());
    for (row, ts) in index.iter().enumerate() {
        rows.entry(*ts).or_insert(row);
    }
    rows
}

fn realign(column: &Column, rows: &HashMap<Timestamp, usize>, index: &[Timestamp]) -> Column {
    Column {
        name: column.name.clone(),
        values: index
            .iter()
            .map(|ts| rows.get(ts).and_then(|&row| column.values[row]))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(name: &str, rows: &[(i64, Option<f64>)]) -> TimeTable {
        TimeTable::from_series(
            name,
            rows.iter().map(|(ts, _)| *ts).collect(),
            rows.iter().map(|(_, v)| *v).collect(),
        )
    }

    #[test]
    fn test_from_samples_rounds_fractional_timestamps() {
        let table = TimeTable::from_samples("m", &[(999.6, Some(1.0)), (1001.2, Some(2.0))]);
        assert_eq!(table.index(), &[1000, 1001]);
        assert_eq!(table.value_at("m", 1000), Some(1.0));

        let halves = TimeTable::from_samples("m", &[(1000.5, Some(1.0)), (1003.5, Some(2.0))]);
        assert_eq!(halves.index(), &[1000, 1004]);
    }

    #[test]
    fn test_non_finite_values_become_missing() {
        let table = series("m", &[(1, Some(f64::NAN)), (2, Some(f64::INFINITY)), (3, Some(1.0))]);
        assert_eq!(table.column("m").unwrap(), &[None, None, Some(1.0)]);
    }

    #[test]
    fn test_empty_and_metric_presence() {
        let table = TimeTable::with_index(vec![1, 2]);
        assert!(!table.is_empty());
        assert!(!table.has_metrics());
        assert!(TimeTable::new().is_empty());
    }

    #[test]
    fn test_first_difference() {
        let table = series("io", &[(0, Some(0.0)), (1, Some(500.0)), (2, Some(1300.0))]);
        let diff = table.first_difference();
        assert_eq!(diff.column("io").unwrap(), &[None, Some(500.0), Some(800.0)]);
    }

    #[test]
    fn test_first_difference_sorts_rows_first() {
        let table = series("c", &[(2, Some(30.0)), (0, Some(10.0)), (1, Some(15.0))]);
        let diff = table.first_difference();
        assert_eq!(diff.index(), &[0, 1, 2]);
        assert_eq!(diff.column("c").unwrap(), &[None, Some(5.0), Some(15.0)]);
    }

    #[test]
    fn test_fill_missing() {
        let table = series("m", &[(1, None), (2, Some(3.0))]);
        assert_eq!(table.fill_missing(0.0).column("m").unwrap(), &[Some(0.0), Some(3.0)]);
    }

    #[test]
    fn test_dedup_keeps_first_row() {
        let table = series("m", &[(1, Some(1.0)), (1, Some(9.0)), (2, Some(2.0))]);
        let deduped = table.dedup_timestamps();
        assert_eq!(deduped.index(), &[1, 2]);
        assert_eq!(deduped.column("m").unwrap(), &[Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_outer_join_leaves_gaps_missing() {
        let a = series("a", &[(1, Some(1.0)), (2, Some(2.0))]);
        let b = series("b", &[(2, Some(20.0)), (3, Some(30.0))]);
        let joined = a.outer_join(&b);

        assert_eq!(joined.index(), &[1, 2, 3]);
        assert_eq!(joined.column("a").unwrap(), &[Some(1.0), Some(2.0), None]);
        assert_eq!(joined.column("b").unwrap(), &[None, Some(20.0), Some(30.0)]);
    }

    #[test]
    fn test_outer_join_replaces_same_named_column() {
        let a = series("sda", &[(1, Some(1.0))]);
        let b = series("sda", &[(1, Some(5.0))]);
        let joined = a.outer_join(&b);
        assert_eq!(joined.column_names().count(), 1);
        assert_eq!(joined.value_at("sda", 1), Some(5.0));
    }

    #[test]
    fn test_outer_add_treats_missing_as_zero() {
        let a = series("cpu", &[(1, Some(10.0)), (2, None)]);
        let b = series("cpu", &[(2, Some(5.0)), (3, Some(7.0))]);
        let sum = a.outer_add(&b, "cpu");

        assert_eq!(sum.index(), &[1, 2, 3]);
        assert_eq!(sum.column("cpu").unwrap(), &[Some(10.0), Some(5.0), Some(7.0)]);
    }

    #[test]
    fn test_outer_add_with_empty_side() {
        let b = series("cpu", &[(1, Some(4.0))]);
        let sum = TimeTable::new().outer_add(&b, "cpu");
        assert_eq!(sum.index(), &[1]);
        assert_eq!(sum.value_at("cpu", 1), Some(4.0));
    }

    #[test]
    fn test_select_and_rename() {
        let mut table = series("a", &[(1, Some(1.0))]);
        table.set_column("b", vec![Some(2.0)]);
        let selected = table.select(&["b", "missing"]);
        assert_eq!(selected.column_names().collect::<Vec<_>>(), vec!["b"]);

        let renamed = table.rename_columns(|n| format!("x/{n}"));
        assert!(renamed.contains("x/a"));
        assert!(renamed.contains("x/b"));
    }
}
