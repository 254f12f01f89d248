//! Generic row-store port trait.
//!
//! The store is schema-driven: configuration supplies an ordered column list
//! per table, and rows travel as column-name → string mappings. Typed
//! parsing happens in the domain, next to the types that own the rows.

use std::collections::HashMap;

use crate::domain::error::TraderError;

/// One persisted row, keyed by column name.
pub type Row = HashMap<String, String>;

pub trait StorePort {
    /// Insert a row assembled from `values`. Absent columns are written as
    /// the `"-"` sentinel; declared column order is preserved. Keys not in
    /// the table's schema are ignored.
    fn insert_row(&self, table: &str, values: &HashMap<String, String>)
        -> Result<(), TraderError>;

    /// Query rows matching every (column, value) equality in `predicate`,
    /// optionally projecting a subset of columns. An unknown table yields
    /// `Ok(None)` rather than an error.
    fn query(
        &self,
        table: &str,
        predicate: &[(&str, &str)],
        projection: Option<&[&str]>,
    ) -> Result<Option<Vec<Row>>, TraderError>;

    /// Query exactly zero or one row. More than one match is a fatal
    /// `StoreQuery` error; an unknown table yields `Ok(None)`.
    fn query_one(
        &self,
        table: &str,
        predicate: &[(&str, &str)],
    ) -> Result<Option<Row>, TraderError>;

    /// Set `column` to `value` on every row matching `predicate`. Returns
    /// the number of rows updated.
    fn update_value(
        &self,
        table: &str,
        predicate: &[(&str, &str)],
        column: &str,
        value: &str,
    ) -> Result<usize, TraderError>;

    /// Declared column order for `table`, or `None` for an unknown table.
    fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>, TraderError>;
}
