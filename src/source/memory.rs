//! In-memory data source.
//!
//! Reference [`DataSource`](super::traits::DataSource) backed by a
//! `DashMap` of tables. Useful for tests and for exercising adapters without
//! a database:
//!
//! - writes locate rows through the primary key parameters of the command
//!   (original version for update/delete, current for insert);
//! - a select's text is a `;`-separated list of table names, one result set
//!   per name;
//! - failures can be injected per row, per dispatch, or on open.
//!
//! Statement text of writes is ignored, so templates from any builder work
//! as long as they bind the key column.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use super::traits::{
    CommandBuilder, CommandExecutor, CommandFailure, Connection, RowStream, SourceError, Transaction,
};
use crate::command::{Command, CommandTemplate, ParameterBinding, StatementKind};
use crate::table::{ColumnDef, Row, RowVersion, TableSchema};

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Map<String, Value>>,
}

impl MemoryTable {
    fn key_column(&self) -> Option<&str> {
        self.schema.primary_key().map(|c| c.name.as_str())
    }

    fn position(&self, key: &Value) -> Option<usize> {
        let pk = self.key_column()?;
        self.rows.iter().position(|r| r.get(pk) == Some(key))
    }
}

/// Injected failure for one row of one table.
#[derive(Debug, Clone)]
struct CommandFault {
    table: String,
    kind: StatementKind,
    key: Value,
    failure: CommandFailure,
}

type Tables = Arc<DashMap<String, MemoryTable>>;

pub struct InMemorySource {
    tables: Tables,
    open: AtomicBool,
    timeout: Mutex<Option<Duration>>,
    latency: Mutex<Option<Duration>>,
    command_faults: Mutex<Vec<CommandFault>>,
    dispatch_faults: Mutex<VecDeque<SourceError>>,
    open_faults: AtomicUsize,
    open_count: AtomicUsize,
    batch_calls: AtomicUsize,
    non_query_calls: AtomicUsize,
    reader_calls: AtomicUsize,
}

impl InMemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Arc::new(DashMap::new()),
            open: AtomicBool::new(false),
            timeout: Mutex::new(None),
            latency: Mutex::new(None),
            command_faults: Mutex::new(Vec::new()),
            dispatch_faults: Mutex::new(VecDeque::new()),
            open_faults: AtomicUsize::new(0),
            open_count: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            non_query_calls: AtomicUsize::new(0),
            reader_calls: AtomicUsize::new(0),
        }
    }

    /// Create (or replace) a table with the current values of `rows`.
    pub fn insert_table(&self, name: impl Into<String>, schema: TableSchema, rows: Vec<Row>) {
        let rows = rows.into_iter().map(|r| r.values().clone()).collect();
        self.tables.insert(name.into(), MemoryTable { schema, rows });
    }

    #[must_use]
    pub fn with_table(self, name: impl Into<String>, schema: TableSchema, rows: Vec<Row>) -> Self {
        self.insert_table(name, schema, rows);
        self
    }

    /// Snapshot of a table's stored rows.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Map<String, Value>> {
        self.tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Stored row whose key column equals `key`.
    #[must_use]
    pub fn find(&self, table: &str, key: &Value) -> Option<Map<String, Value>> {
        let t = self.tables.get(table)?;
        t.position(key).map(|i| t.rows[i].clone())
    }

    /// Reject every `kind` command touching the row with `key`.
    pub fn fail_command(&self, table: &str, kind: StatementKind, key: Value, failure: CommandFailure) {
        self.command_faults.lock().push(CommandFault {
            table: table.to_string(),
            kind,
            key,
            failure,
        });
    }

    pub fn clear_faults(&self) {
        self.command_faults.lock().clear();
        self.dispatch_faults.lock().clear();
        self.open_faults.store(0, Ordering::SeqCst);
    }

    /// Fail the next round-trip (batch, single command or reader) with `error`.
    pub fn fail_next_dispatch(&self, error: SourceError) {
        self.dispatch_faults.lock().push_back(error);
    }

    /// Refuse the next `count` opens.
    pub fn fail_next_opens(&self, count: usize) {
        self.open_faults.store(count, Ordering::SeqCst);
    }

    /// Delay every round-trip by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn non_query_calls(&self) -> usize {
        self.non_query_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn reader_calls(&self) -> usize {
        self.reader_calls.load(Ordering::SeqCst)
    }

    /// Common entry of every round-trip: connection check, injected
    /// dispatch failure, simulated latency.
    async fn round_trip(&self) -> Result<(), SourceError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SourceError::Connection("connection is closed".into()));
        }
        if let Some(error) = self.dispatch_faults.lock().pop_front() {
            return Err(error);
        }
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    fn injected_fault(&self, command: &Command, key: Option<&Value>) -> Option<CommandFailure> {
        let key = key?;
        self.command_faults
            .lock()
            .iter()
            .find(|f| f.table == command.table && f.kind == command.kind && &f.key == key)
            .map(|f| f.failure.clone())
    }

    /// Apply one write command.
    fn apply(&self, command: &Command) -> Result<u64, CommandFailure> {
        let mut table = self.tables.get_mut(&command.table).ok_or_else(|| {
            CommandFailure::new(format!("relation \"{}\" does not exist", command.table)).with_code("42P01")
        })?;
        let pk = table
            .key_column()
            .ok_or_else(|| CommandFailure::new(format!("table {} has no columns", command.table)))?
            .to_string();

        let key = match command.kind {
            StatementKind::Insert => parameter(command, &pk, RowVersion::Current),
            _ => parameter(command, &pk, RowVersion::Original).or_else(|| parameter(command, &pk, RowVersion::Current)),
        };
        if let Some(failure) = self.injected_fault(command, key) {
            return Err(failure);
        }

        match command.kind {
            StatementKind::Insert => {
                let key = key.cloned().unwrap_or(Value::Null);
                if table.position(&key).is_some() {
                    return Err(CommandFailure::new(format!(
                        "duplicate key value {} violates primary key of {}",
                        key, command.table
                    ))
                    .with_code("23505"));
                }
                let row: Map<String, Value> = table
                    .schema
                    .columns()
                    .iter()
                    .map(|c| {
                        let value = parameter(command, &c.name, RowVersion::Current).cloned();
                        (c.name.clone(), value.unwrap_or(Value::Null))
                    })
                    .collect();
                table.rows.push(row);
                Ok(1)
            }
            StatementKind::Update => {
                let Some(position) = key.and_then(|k| table.position(k)) else {
                    return Ok(0);
                };
                let updates: Vec<(String, Value)> = command
                    .parameters
                    .iter()
                    .filter(|p| p.version == RowVersion::Current && p.direction.reads_row())
                    .filter(|p| table.schema.contains(&p.source_column))
                    .map(|p| (p.source_column.clone(), p.value.clone()))
                    .collect();
                let row = &mut table.rows[position];
                for (column, value) in updates {
                    row.insert(column, value);
                }
                Ok(1)
            }
            StatementKind::Delete => match key.and_then(|k| table.position(k)) {
                Some(position) => {
                    table.rows.remove(position);
                    Ok(1)
                }
                None => Ok(0),
            },
            StatementKind::Select => Err(CommandFailure::new("select requires a reader").with_code("42000")),
        }
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of the row-reading parameter bound to `column` in `version`.
fn parameter<'c>(command: &'c Command, column: &str, version: RowVersion) -> Option<&'c Value> {
    command
        .parameters
        .iter()
        .find(|p| p.source_column == column && p.version == version && p.direction.reads_row())
        .map(|p| &p.value)
}

#[async_trait]
impl Connection for InMemorySource {
    async fn open(&self) -> Result<(), SourceError> {
        let refused = self
            .open_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SourceError::Connection("connection refused".into()));
        }
        self.open.store(true, Ordering::SeqCst);
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, SourceError> {
        if !self.is_open() {
            return Err(SourceError::Connection("connection is closed".into()));
        }
        let snapshot = self
            .tables
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            snapshot: Some(snapshot),
        }))
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        *self.timeout.lock() = timeout;
    }

    fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock()
    }
}

#[async_trait]
impl CommandExecutor for InMemorySource {
    async fn execute_non_query(&self, command: &Command) -> Result<u64, SourceError> {
        self.round_trip().await?;
        self.non_query_calls.fetch_add(1, Ordering::SeqCst);
        self.apply(command).map_err(SourceError::Command)
    }

    async fn execute_reader(&self, command: &Command) -> Result<Box<dyn RowStream>, SourceError> {
        self.round_trip().await?;
        self.reader_calls.fetch_add(1, Ordering::SeqCst);

        let mut sets = Vec::new();
        for name in command.text.split(';').map(str::trim).filter(|n| !n.is_empty()) {
            let table = self.tables.get(name).ok_or_else(|| {
                SourceError::Command(
                    CommandFailure::new(format!("relation \"{}\" does not exist", name)).with_code("42P01"),
                )
            })?;
            let columns = table.schema.columns().to_vec();
            let rows = table
                .rows
                .iter()
                .map(|r| columns.iter().map(|c| r.get(&c.name).cloned().unwrap_or(Value::Null)).collect())
                .collect();
            sets.push(ResultSet { columns, rows });
        }
        debug!(result_sets = sets.len(), "Reader opened");
        Ok(Box::new(MemoryRowStream { sets, position: 0 }))
    }

    async fn execute_batch(
        &self,
        commands: &[Command],
    ) -> Result<Vec<Result<u64, CommandFailure>>, SourceError> {
        self.round_trip().await?;
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(commands.iter().map(|c| self.apply(c)).collect())
    }
}

struct ResultSet {
    columns: Vec<ColumnDef>,
    rows: VecDeque<Vec<Value>>,
}

pub struct MemoryRowStream {
    sets: Vec<ResultSet>,
    position: usize,
}

#[async_trait]
impl RowStream for MemoryRowStream {
    fn columns(&self) -> &[ColumnDef] {
        self.sets.get(self.position).map_or(&[][..], |s| s.columns.as_slice())
    }

    async fn next_row(&mut self) -> Result<Option<Vec<Value>>, SourceError> {
        Ok(self.sets.get_mut(self.position).and_then(|s| s.rows.pop_front()))
    }

    async fn next_result(&mut self) -> Result<bool, SourceError> {
        if self.position < self.sets.len() {
            self.position += 1;
        }
        Ok(self.position < self.sets.len())
    }
}

/// Snapshot transaction: rollback restores every table as of `begin`.
pub struct MemoryTransaction {
    tables: Tables,
    snapshot: Option<HashMap<String, MemoryTable>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(&mut self) -> Result<(), SourceError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| SourceError::Transport("transaction already finished".into()))
    }

    async fn rollback(&mut self) -> Result<(), SourceError> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| SourceError::Transport("transaction already finished".into()))?;
        self.tables.clear();
        for (name, table) in snapshot {
            self.tables.insert(name, table);
        }
        Ok(())
    }
}

/// Builds templates the in-memory source understands.
///
/// Insert binds every column; update binds every column plus the original
/// key as `@original_<key>`; delete binds only the original key.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryCommandBuilder;

impl CommandBuilder for MemoryCommandBuilder {
    fn build(&self, table: &str, schema: &TableSchema, kind: StatementKind) -> Result<CommandTemplate, SourceError> {
        let pk = schema
            .primary_key()
            .ok_or_else(|| SourceError::Schema(format!("table {} has no columns", table)))?;
        let key_param = format!("@original_{}", pk.name);
        let names: Vec<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();

        let template = match kind {
            StatementKind::Select => CommandTemplate::new(kind, table, table),
            StatementKind::Insert => {
                let params: Vec<String> = names.iter().map(|n| format!("@{}", n)).collect();
                let text = format!("INSERT INTO {} ({}) VALUES ({})", table, names.join(", "), params.join(", "));
                names
                    .iter()
                    .fold(CommandTemplate::new(kind, table, text), |t, n| {
                        t.with_binding(ParameterBinding::input(format!("@{}", n), *n))
                    })
            }
            StatementKind::Update => {
                let sets: Vec<String> = names.iter().map(|n| format!("{} = @{}", n, n)).collect();
                let text = format!("UPDATE {} SET {} WHERE {} = {}", table, sets.join(", "), pk.name, key_param);
                names
                    .iter()
                    .fold(CommandTemplate::new(kind, table, text), |t, n| {
                        t.with_binding(ParameterBinding::input(format!("@{}", n), *n))
                    })
                    .with_binding(ParameterBinding::original(key_param.clone(), pk.name.clone()))
            }
            StatementKind::Delete => {
                let text = format!("DELETE FROM {} WHERE {} = {}", table, pk.name, key_param);
                CommandTemplate::new(kind, table, text)
                    .with_binding(ParameterBinding::original(key_param.clone(), pk.name.clone()))
            }
        };
        Ok(template)
    }
}
