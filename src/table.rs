// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory tabular data.
//!
//! A [`Table`] is an ordered list of [`Row`]s plus a [`TableSchema`]. Rows
//! track their own change state so the adapter knows which statement to run
//! for each one when writing back.
//!
//! # Example
//!
//! ```
//! use sync_adapter::{Row, RowState, Table, TableSchema, ColumnDef, DataType};
//! use serde_json::json;
//!
//! let schema = TableSchema::new(vec![
//!     ColumnDef::new("id", DataType::Integer).primary_key(),
//!     ColumnDef::new("name", DataType::Text),
//! ]);
//! let mut table = Table::new("users", schema);
//!
//! table.push(Row::loaded([("id", json!(1)), ("name", json!("Ada"))]));
//! assert_eq!(table.rows()[0].state(), RowState::Unchanged);
//!
//! table.rows_mut()[0].set("name", json!("Grace"));
//! assert_eq!(table.rows()[0].state(), RowState::Modified);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Change state of a row relative to the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowState {
    /// Matches the source, nothing to write
    Unchanged,
    /// New row, needs an insert
    Added,
    /// Existing row with changed values, needs an update
    Modified,
    /// Existing row marked for removal, needs a delete
    Deleted,
    /// Removed from the table (a committed delete, or an added row deleted before insert)
    Detached,
}

impl RowState {
    /// Whether a row in this state has something to persist.
    #[must_use]
    pub fn needs_persist(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

impl std::fmt::Display for RowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "Unchanged"),
            Self::Added => write!(f, "Added"),
            Self::Modified => write!(f, "Modified"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Detached => write!(f, "Detached"),
        }
    }
}

/// Which snapshot of a row a value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RowVersion {
    /// Values as edited in memory
    #[default]
    Current,
    /// Values as last loaded from (or accepted by) the source
    Original,
}

/// A row: ordered column values, an original snapshot, and a change state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original: Option<Map<String, Value>>,
    state: RowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn to_map<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

impl Row {
    /// A brand-new row, pending insert.
    pub fn new<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            values: to_map(pairs),
            original: None,
            state: RowState::Added,
            error: None,
        }
    }

    /// A row as read from the source (Unchanged, original == current).
    pub fn loaded<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::with_state(pairs, RowState::Unchanged)
    }

    /// A row in an explicit state. Every state but `Added` gets an original
    /// snapshot equal to the given values.
    pub fn with_state<I, K>(pairs: I, state: RowState) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values = to_map(pairs);
        let original = (state != RowState::Added).then(|| values.clone());
        Self {
            values,
            original,
            state,
            error: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> RowState {
        self.state
    }

    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    #[must_use]
    pub fn original(&self) -> Option<&Map<String, Value>> {
        self.original.as_ref()
    }

    /// Current value of a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Value of a column in the requested version. Rows without an
    /// original snapshot (Added) have no original values.
    #[must_use]
    pub fn get_version(&self, column: &str, version: RowVersion) -> Option<&Value> {
        match version {
            RowVersion::Current => self.values.get(column),
            RowVersion::Original => self.original.as_ref().and_then(|o| o.get(column)),
        }
    }

    /// Set a column value. Unchanged rows become Modified.
    /// Returns false (and changes nothing) on Deleted or Detached rows.
    pub fn set(&mut self, column: impl Into<String>, value: Value) -> bool {
        match self.state {
            RowState::Deleted | RowState::Detached => false,
            RowState::Unchanged => {
                self.values.insert(column.into(), value);
                self.state = RowState::Modified;
                true
            }
            RowState::Added | RowState::Modified => {
                self.values.insert(column.into(), value);
                true
            }
        }
    }

    /// Mark the row for deletion. An Added row never reached the source,
    /// so it is detached instead.
    pub fn delete(&mut self) {
        self.state = match self.state {
            RowState::Added | RowState::Detached => RowState::Detached,
            _ => RowState::Deleted,
        };
    }

    /// Commit in-memory changes as the new baseline.
    pub fn accept_changes(&mut self) {
        match self.state {
            RowState::Added | RowState::Modified => {
                self.original = Some(self.values.clone());
                self.state = RowState::Unchanged;
            }
            RowState::Deleted => self.state = RowState::Detached,
            RowState::Unchanged | RowState::Detached => {}
        }
        self.error = None;
    }

    /// Roll back in-memory changes to the original snapshot.
    pub fn reject_changes(&mut self) {
        match (self.state, self.original.as_ref()) {
            (RowState::Added, _) => self.state = RowState::Detached,
            (RowState::Modified | RowState::Deleted, Some(original)) => {
                self.values = original.clone();
                self.state = RowState::Unchanged;
            }
            _ => {}
        }
        self.error = None;
    }

    #[must_use]
    pub fn row_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Overwrite values with freshly loaded ones (used by fill merges).
    pub(crate) fn overwrite(&mut self, values: Map<String, Value>, state: RowState) {
        self.original = (state != RowState::Added).then(|| values.clone());
        self.values = values;
        self.state = state;
        self.error = None;
    }
}

/// Column value type, as reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Integer,
    Float,
    Text,
    Bytes,
    Json,
}

/// One column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    /// Nullable, non-key column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
        }
    }

    /// Mark as the primary key (implies not null).
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Ordered column definitions of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    #[must_use]
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Append a column unless one with the same name exists.
    /// Returns true if the column was added.
    pub fn add_column(&mut self, column: ColumnDef) -> bool {
        if self.contains(&column.name) {
            return false;
        }
        self.columns.push(column);
        true
    }

    /// The identity column: the column flagged as primary key, or the
    /// first column when none is flagged.
    #[must_use]
    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .or_else(|| self.columns.first())
    }

    /// Whether a column is explicitly flagged as primary key.
    #[must_use]
    pub fn has_explicit_key(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key)
    }
}

/// A named table of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    name: String,
    schema: TableSchema,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: TableSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut TableSchema {
        &mut self.schema
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the live row whose identity column equals `key`.
    #[must_use]
    pub fn find_by_key(&self, key: &Value) -> Option<usize> {
        let pk = self.schema.primary_key()?;
        self.rows
            .iter()
            .position(|r| r.state() != RowState::Detached && r.get(&pk.name) == Some(key))
    }

    /// Number of rows with changes waiting to be persisted.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.rows.iter().filter(|r| r.state().needs_persist()).count()
    }

    /// Name, schema and rows borrowed at once, rows mutably.
    pub(crate) fn parts_mut(&mut self) -> (&str, &TableSchema, &mut [Row]) {
        (&self.name, &self.schema, &mut self.rows)
    }

    /// Drop detached rows. Returns how many were removed.
    pub fn remove_detached(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| r.state() != RowState::Detached);
        before - self.rows.len()
    }
}

/// A collection of tables, the target of a multi-result fill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    tables: Vec<Table>,
}

impl DataSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    /// Add a table, replacing any table with the same name.
    pub fn add_table(&mut self, table: Table) {
        match self.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnDef::new("id", DataType::Integer).primary_key(),
            ColumnDef::new("name", DataType::Text),
        ])
    }

    #[test]
    fn test_new_row_is_added_without_original() {
        let row = Row::new([("id", json!(1))]);
        assert_eq!(row.state(), RowState::Added);
        assert!(row.original().is_none());
        assert!(row.get_version("id", RowVersion::Original).is_none());
    }

    #[test]
    fn test_set_marks_unchanged_row_modified_and_keeps_original() {
        let mut row = Row::loaded([("id", json!(1)), ("name", json!("a"))]);
        assert!(row.set("name", json!("b")));

        assert_eq!(row.state(), RowState::Modified);
        assert_eq!(row.get("name"), Some(&json!("b")));
        assert_eq!(row.get_version("name", RowVersion::Original), Some(&json!("a")));
    }

    #[test]
    fn test_set_on_deleted_row_is_rejected() {
        let mut row = Row::loaded([("id", json!(1))]);
        row.delete();
        assert!(!row.set("id", json!(2)));
        assert_eq!(row.get("id"), Some(&json!(1)));
    }

    #[test]
    fn test_delete_added_row_detaches() {
        let mut row = Row::new([("id", json!(1))]);
        row.delete();
        assert_eq!(row.state(), RowState::Detached);
    }

    #[test]
    fn test_accept_changes() {
        let mut modified = Row::loaded([("id", json!(1)), ("name", json!("a"))]);
        modified.set("name", json!("b"));
        modified.set_error("boom");
        modified.accept_changes();
        assert_eq!(modified.state(), RowState::Unchanged);
        assert_eq!(modified.get_version("name", RowVersion::Original), Some(&json!("b")));
        assert!(!modified.has_error());

        let mut deleted = Row::with_state([("id", json!(2))], RowState::Deleted);
        deleted.accept_changes();
        assert_eq!(deleted.state(), RowState::Detached);
    }

    #[test]
    fn test_reject_changes_restores_original() {
        let mut row = Row::loaded([("id", json!(1)), ("name", json!("a"))]);
        row.set("name", json!("b"));
        row.reject_changes();
        assert_eq!(row.state(), RowState::Unchanged);
        assert_eq!(row.get("name"), Some(&json!("a")));
    }

    #[test]
    fn test_row_values_keep_insertion_order() {
        let row = Row::new([("z", json!(1)), ("a", json!(2)), ("m", json!(3))]);
        let keys: Vec<&str> = row.values().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_primary_key_falls_back_to_first_column() {
        let flagged = schema();
        assert_eq!(flagged.primary_key().unwrap().name, "id");
        assert!(flagged.has_explicit_key());

        let unflagged = TableSchema::new(vec![
            ColumnDef::new("code", DataType::Text),
            ColumnDef::new("label", DataType::Text),
        ]);
        assert_eq!(unflagged.primary_key().unwrap().name, "code");
        assert!(!unflagged.has_explicit_key());
        assert!(TableSchema::default().primary_key().is_none());
    }

    #[test]
    fn test_add_column_ignores_duplicates() {
        let mut s = schema();
        assert!(!s.add_column(ColumnDef::new("id", DataType::Text)));
        assert!(s.add_column(ColumnDef::new("email", DataType::Text)));
        assert_eq!(s.columns().len(), 3);
    }

    #[test]
    fn test_table_find_by_key_and_remove_detached() {
        let mut table = Table::new("users", schema());
        table.push(Row::loaded([("id", json!(1))]));
        table.push(Row::loaded([("id", json!(2))]));
        table.push(Row::new([("id", json!(3))]));

        assert_eq!(table.find_by_key(&json!(2)), Some(1));
        assert_eq!(table.pending_changes(), 1);

        table.rows_mut()[1].delete();
        table.rows_mut()[1].accept_changes();
        assert_eq!(table.find_by_key(&json!(2)), None);
        assert_eq!(table.remove_detached(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_dataset_add_table_replaces_same_name() {
        let mut ds = DataSet::new();
        ds.add_table(Table::new("t", schema()));
        let mut replacement = Table::new("t", schema());
        replacement.push(Row::loaded([("id", json!(9))]));
        ds.add_table(replacement);

        assert_eq!(ds.len(), 1);
        assert_eq!(ds.table("t").unwrap().len(), 1);
    }
}
