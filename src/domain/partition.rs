//! Site partition: the rows one organisation holds locally.
//!
//! A partition is never part of a protocol message. Only statistics derived
//! from it leave the site.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use super::CellValue;

/// One row of a partition, keyed by column name.
pub type Row = BTreeMap<String, CellValue>;

/// Rows held by a single site.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SitePartition {
    rows: Vec<Row>,
}

impl SitePartition {
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether any row carries the given column.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.rows.iter().any(|row| row.contains_key(name))
    }

    /// All column names seen in the partition.
    #[must_use]
    pub fn columns(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect()
    }

    /// Copy of the partition holding only the named columns.
    ///
    /// Anything not needed for the requested computation is dropped before scoring.
    #[must_use]
    pub fn retain_columns(&self, keep: &BTreeSet<String>) -> Self {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .filter(|(k, _)| keep.contains(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .collect();
        Self { rows }
    }

    /// Add (or overwrite) a derived column.
    ///
    /// If `values` is shorter than the partition, the remaining rows are left untouched.
    pub fn set_column(&mut self, name: &str, values: impl IntoIterator<Item = CellValue>) {
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(name.to_string(), value);
        }
    }
}

impl FromIterator<Row> for SitePartition {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
