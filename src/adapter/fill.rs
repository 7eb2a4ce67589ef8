//! Fill and FillSchema.
//!
//! The select template's text goes to the source as a reader. Result set
//! `i` lands in the table named after the template's table, suffixed with
//! `i` from the second set on (`orders`, `orders1`, `orders2`, ...).
//! Both Fill variants return the row count of the first result set only.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::{Command, StatementKind};
use crate::config::MissingSchemaAction;
use crate::error::AdapterError;
use crate::metrics::{self, LatencyTimer};
use crate::slots::TemplateRef;
use crate::source::guarded;
use crate::source::traits::{CommandExecutor, RowStream, SourceError};
use crate::source::DispatchError;
use crate::table::{ColumnDef, DataSet, Row, RowState, Table, TableSchema};

use super::SyncAdapter;

/// Target table name for result set `index`.
fn result_table_name(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{}{}", base, index)
    }
}

/// Table `name` of `target`, created when missing and the action allows it.
fn target_table<'t>(
    target: &'t mut DataSet,
    name: &str,
    action: MissingSchemaAction,
) -> Result<Option<&'t mut Table>, AdapterError> {
    if target.table(name).is_none() {
        match action {
            MissingSchemaAction::Ignore => return Ok(None),
            MissingSchemaAction::Error => return Err(AdapterError::MissingSchema(format!("table {}", name))),
            MissingSchemaAction::Add | MissingSchemaAction::AddWithKey => {
                target.add_table(Table::new(name, TableSchema::default()));
            }
        }
    }
    Ok(target.table_mut(name))
}

/// Reconcile `table`'s schema with incoming `columns`.
/// Returns, per incoming column, whether its values are kept.
fn merge_columns(
    table: &mut Table,
    columns: &[ColumnDef],
    action: MissingSchemaAction,
) -> Result<Vec<bool>, AdapterError> {
    let mut keep = Vec::with_capacity(columns.len());
    for column in columns {
        if table.schema().contains(&column.name) {
            keep.push(true);
            continue;
        }
        match action {
            MissingSchemaAction::Add => {
                let mut column = column.clone();
                column.primary_key = false;
                table.schema_mut().add_column(column);
                keep.push(true);
            }
            MissingSchemaAction::AddWithKey => {
                table.schema_mut().add_column(column.clone());
                keep.push(true);
            }
            MissingSchemaAction::Ignore => keep.push(false),
            MissingSchemaAction::Error => {
                return Err(AdapterError::MissingSchema(format!(
                    "column {}.{}",
                    table.name(),
                    column.name
                )))
            }
        }
    }
    Ok(keep)
}

impl SyncAdapter {
    /// Load every result set of the select command into `target`.
    ///
    /// Returns the number of rows loaded from the first result set.
    pub async fn fill(&mut self, target: &mut DataSet, cancel: &CancellationToken) -> Result<usize, AdapterError> {
        let _timer = LatencyTimer::new("fill");
        let select = self.select_template()?;
        let opened = self.open_if_closed(cancel).await?;
        let result = self.fill_sets(&select, target, cancel).await;
        self.close_if_opened(opened).await;

        if let Ok(count) = &result {
            info!(table = select.table(), first_set_rows = *count, "Fill finished");
        }
        result
    }

    /// Load the first result set of the select command into `table`,
    /// whatever its name.
    pub async fn fill_table(&mut self, table: &mut Table, cancel: &CancellationToken) -> Result<usize, AdapterError> {
        let _timer = LatencyTimer::new("fill");
        let select = self.select_template()?;
        let opened = self.open_if_closed(cancel).await?;
        let result = async {
            let mut stream = self.open_reader(&select, cancel).await?;
            self.load_rows(table, stream.as_mut(), cancel).await
        }
        .await;
        self.close_if_opened(opened).await;
        result
    }

    /// Discover the columns of every result set without loading rows.
    ///
    /// Tables of `target` are created or extended (key flags included) and
    /// their resulting schemas returned in result-set order.
    pub async fn fill_schema(
        &mut self,
        target: &mut DataSet,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableSchema>, AdapterError> {
        let _timer = LatencyTimer::new("fill_schema");
        let select = self.select_template()?;
        let opened = self.open_if_closed(cancel).await?;
        let result = self.discover(&select, target, cancel).await;
        self.close_if_opened(opened).await;

        result.map_err(|e| match e {
            AdapterError::Transport(source) | AdapterError::Connection(source) => AdapterError::SchemaDiscovery(source),
            other => other,
        })
    }

    fn select_template(&self) -> Result<TemplateRef, AdapterError> {
        self.slots.get(StatementKind::Select).ok_or(AdapterError::MissingCommand {
            kind: StatementKind::Select,
            row: None,
        })
    }

    async fn open_reader(
        &self,
        select: &TemplateRef,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowStream>, AdapterError> {
        let command = Command::unbound(select);
        Ok(guarded(self.source.execute_reader(&command), self.config.command_timeout(), cancel).await?)
    }

    async fn next_result(&self, stream: &mut dyn RowStream, cancel: &CancellationToken) -> Result<bool, DispatchError> {
        guarded(stream.next_result(), self.config.command_timeout(), cancel).await
    }

    async fn fill_sets(
        &self,
        select: &TemplateRef,
        target: &mut DataSet,
        cancel: &CancellationToken,
    ) -> Result<usize, AdapterError> {
        let mut stream = self.open_reader(select, cancel).await?;
        let action = self.config.missing_schema_action;
        let mut first = None;
        let mut index = 0;

        loop {
            let name = result_table_name(select.table(), index);
            let loaded = match target_table(target, &name, action)? {
                Some(table) => self.load_rows(table, stream.as_mut(), cancel).await?,
                None => {
                    debug!(table = %name, "Result set ignored, no target table");
                    0
                }
            };
            first.get_or_insert(loaded);

            if !self.next_result(stream.as_mut(), cancel).await? {
                break;
            }
            index += 1;
        }
        Ok(first.unwrap_or(0))
    }

    /// Read the current result set of `stream` into `table`.
    async fn load_rows(
        &self,
        table: &mut Table,
        stream: &mut dyn RowStream,
        cancel: &CancellationToken,
    ) -> Result<usize, AdapterError> {
        let timeout = self.config.command_timeout();
        let columns = stream.columns().to_vec();
        let keep = merge_columns(table, &columns, self.config.missing_schema_action)?;
        let key = table
            .schema()
            .has_explicit_key()
            .then(|| table.schema().primary_key().map(|c| c.name.clone()))
            .flatten();
        let state = if self.config.accept_changes_during_fill {
            RowState::Unchanged
        } else {
            RowState::Added
        };

        let mut count = 0;
        let mut merged = 0;
        while let Some(values) = guarded(stream.next_row(), timeout, cancel).await? {
            if values.len() != columns.len() {
                return Err(AdapterError::Transport(SourceError::Transport(format!(
                    "row has {} values for {} columns",
                    values.len(),
                    columns.len()
                ))));
            }
            let incoming: Map<String, Value> = columns
                .iter()
                .zip(values)
                .zip(&keep)
                .filter(|(_, keep)| **keep)
                .map(|((column, value), _)| (column.name.clone(), value))
                .collect();

            let existing = key
                .as_deref()
                .and_then(|k| incoming.get(k))
                .and_then(|v| table.find_by_key(v));
            match existing {
                Some(position) => {
                    table.rows_mut()[position].overwrite(incoming, state);
                    merged += 1;
                }
                None => table.push(Row::with_state(incoming, state)),
            }
            count += 1;
        }

        metrics::record_rows_filled(count);
        debug!(table = table.name(), rows = count, merged, "Result set loaded");
        Ok(count)
    }

    async fn discover(
        &self,
        select: &TemplateRef,
        target: &mut DataSet,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableSchema>, AdapterError> {
        let mut stream = self.open_reader(select, cancel).await?;
        let mut schemas = Vec::new();
        let mut index = 0;

        loop {
            let name = result_table_name(select.table(), index);
            if target.table(&name).is_none() {
                target.add_table(Table::new(name.as_str(), TableSchema::default()));
            }
            if let Some(table) = target.table_mut(&name) {
                merge_columns(table, stream.columns(), MissingSchemaAction::AddWithKey)?;
                schemas.push(table.schema().clone());
            }

            if !self.next_result(stream.as_mut(), cancel).await? {
                break;
            }
            index += 1;
        }
        Ok(schemas)
    }
}
