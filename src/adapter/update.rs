//! Update: persist changed rows through the state machine.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batching::command_batcher::BatchingEngine;
use crate::command::StatementKind;
use crate::error::AdapterError;
use crate::metrics::LatencyTimer;
use crate::table::{Row, Table, TableSchema};
use crate::update::{RowUpdateStateMachine, UpdatePolicy, UpdateReport, WriteTemplates};

use super::SyncAdapter;

const WRITE_KINDS: [StatementKind; 3] = [StatementKind::Insert, StatementKind::Update, StatementKind::Delete];

impl SyncAdapter {
    /// Persist the changes of `table`.
    ///
    /// On success, rows deleted at the source are removed from the table.
    /// On failure the table is left as the update left it, so report
    /// indexes still match row positions.
    pub async fn update_table(
        &mut self,
        table: &mut Table,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, AdapterError> {
        let report = {
            let (name, schema, rows) = table.parts_mut();
            self.update_rows(name, schema, rows, cancel).await?
        };
        let removed = table.remove_detached();
        if removed > 0 {
            debug!(table = table.name(), removed, "Detached rows removed");
        }
        Ok(report)
    }

    /// Persist the changes of `rows`, which belong to `table` with `schema`.
    ///
    /// Report indexes are positions in `rows`.
    pub async fn update_rows(
        &mut self,
        table: &str,
        schema: &TableSchema,
        rows: &mut [Row],
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, AdapterError> {
        let _timer = LatencyTimer::new("update");
        let templates = self.write_templates(table, schema, rows)?;
        if !rows.iter().any(|r| r.state().needs_persist()) {
            return Ok(UpdateReport::default());
        }

        let opened = self.open_if_closed(cancel).await?;
        let mut engine =
            BatchingEngine::new(self.config.update_batch_size).with_timeout(self.config.command_timeout());
        let policy = UpdatePolicy {
            continue_on_error: self.config.continue_update_on_error,
            accept_changes: self.config.accept_changes_during_update,
        };

        let result = RowUpdateStateMachine::new(self.source.as_ref(), &mut engine, &templates, table, cancel)
            .with_handlers(&self.handlers)
            .with_policy(policy)
            .with_key_column(schema.primary_key().map(|c| c.name.as_str()))
            .run(rows)
            .await;

        self.dispatches += engine.dispatch_count();
        self.close_if_opened(opened).await;
        result
    }

    /// Resolve a template for every write kind some row needs, before any I/O.
    fn write_templates(&self, table: &str, schema: &TableSchema, rows: &[Row]) -> Result<WriteTemplates, AdapterError> {
        let mut templates = WriteTemplates::default();
        for kind in WRITE_KINDS {
            let Some(first) = rows
                .iter()
                .position(|r| StatementKind::for_row_state(r.state()) == Some(kind))
            else {
                continue;
            };
            match self.resolve_template(kind, table, schema)? {
                Some(template) => templates.set(kind, Some(template)),
                None => return Err(AdapterError::MissingCommand { kind, row: Some(first) }),
            }
        }
        Ok(templates)
    }
}
