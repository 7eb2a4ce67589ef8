// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Row update state machine.
//!
//! Each changed row moves through
//!
//! ```text
//! Pending → Updating → Executing → Updated → Committed | Skipped | Failed
//! ```
//!
//! Rows are visited in slice order. In batched mode the Updated events of a
//! batch fire after that batch comes back, in the order the commands were
//! queued. A row-level failure either stops the run (default) or is recorded
//! on the row and the run moves on (`continue_on_error`).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batching::command_batcher::{BatchingEngine, FlushReason};
use crate::command::{Command, CommandOutcome, StatementKind};
use crate::error::AdapterError;
use crate::metrics;
use crate::slots::TemplateRef;
use crate::source::traits::{CommandExecutor, SourceError};
use crate::source::DispatchError;
use crate::table::Row;

use super::events::{RowUpdateHandler, RowUpdatedEvent, RowUpdatingEvent, UpdateStatus};
use super::report::{RowError, RowReport, RowStatus, UpdateReport};

/// Error policy for one update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePolicy {
    pub continue_on_error: bool,
    pub accept_changes: bool,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            accept_changes: true,
        }
    }
}

/// Templates resolved for the write roles.
#[derive(Debug, Clone, Default)]
pub struct WriteTemplates {
    pub insert: Option<TemplateRef>,
    pub update: Option<TemplateRef>,
    pub delete: Option<TemplateRef>,
}

impl WriteTemplates {
    #[must_use]
    pub fn get(&self, kind: StatementKind) -> Option<&TemplateRef> {
        match kind {
            StatementKind::Insert => self.insert.as_ref(),
            StatementKind::Update => self.update.as_ref(),
            StatementKind::Delete => self.delete.as_ref(),
            StatementKind::Select => None,
        }
    }

    pub fn set(&mut self, kind: StatementKind, template: Option<TemplateRef>) {
        match kind {
            StatementKind::Insert => self.insert = template,
            StatementKind::Update => self.update = template,
            StatementKind::Delete => self.delete = template,
            StatementKind::Select => {}
        }
    }
}

/// Why processing stopped early.
enum Halt {
    Row { row: usize, cause: RowError },
    Aborted { row: usize, reason: String },
    MissingCommand { kind: StatementKind, row: usize },
    Cancelled,
    Source(SourceError),
}

impl From<DispatchError> for Halt {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Cancelled => Self::Cancelled,
            DispatchError::Source(e) => Self::Source(e),
        }
    }
}

pub struct RowUpdateStateMachine<'a, E: ?Sized> {
    executor: &'a E,
    engine: &'a mut BatchingEngine,
    templates: &'a WriteTemplates,
    handlers: &'a [Arc<dyn RowUpdateHandler>],
    policy: UpdatePolicy,
    table: &'a str,
    key_column: Option<&'a str>,
    cancel: &'a CancellationToken,
    skip_rest: bool,
    /// (report entry, batch position) of queued rows
    in_flight: Vec<(usize, usize)>,
}

impl<'a, E> RowUpdateStateMachine<'a, E>
where
    E: CommandExecutor + ?Sized,
{
    pub fn new(
        executor: &'a E,
        engine: &'a mut BatchingEngine,
        templates: &'a WriteTemplates,
        table: &'a str,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            executor,
            engine,
            templates,
            handlers: &[],
            policy: UpdatePolicy::default(),
            table,
            key_column: None,
            cancel,
            skip_rest: false,
            in_flight: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_handlers(mut self, handlers: &'a [Arc<dyn RowUpdateHandler>]) -> Self {
        self.handlers = handlers;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Column whose value identifies rows in the report.
    #[must_use]
    pub fn with_key_column(mut self, column: Option<&'a str>) -> Self {
        self.key_column = column;
        self
    }

    /// Persist every changed row of `rows`.
    pub async fn run(mut self, rows: &mut [Row]) -> Result<UpdateReport, AdapterError> {
        let mut report = UpdateReport {
            rows: rows
                .iter()
                .enumerate()
                .filter_map(|(index, row)| {
                    StatementKind::for_row_state(row.state()).map(|kind| RowReport {
                        index,
                        kind,
                        key: self.key_column.and_then(|k| row.get(k).cloned()),
                        status: RowStatus::Pending,
                    })
                })
                .collect(),
        };

        self.engine.clear();
        self.engine.initialize();
        let result = self.process(rows, &mut report).await;
        self.engine.terminate();

        info!(
            table = self.table,
            rows = report.rows.len(),
            committed = report.committed(),
            failed = report.failed(),
            skipped = report.skipped(),
            affected = report.rows_affected(),
            "Row update finished"
        );

        match result {
            Ok(()) => Ok(report),
            Err(Halt::Row { row, cause }) => Err(AdapterError::Update {
                row,
                cause,
                report: Box::new(report),
            }),
            Err(Halt::Aborted { row, reason }) => Err(AdapterError::Aborted {
                row,
                reason,
                report: Box::new(report),
            }),
            Err(Halt::MissingCommand { kind, row }) => Err(AdapterError::MissingCommand {
                kind,
                row: Some(row),
            }),
            Err(Halt::Cancelled) => {
                for entry in report.rows.iter_mut().filter(|r| r.status == RowStatus::Pending) {
                    entry.status = RowStatus::Cancelled;
                    metrics::record_row("cancelled");
                }
                Err(AdapterError::Cancelled {
                    report: Some(Box::new(report)),
                })
            }
            Err(Halt::Source(e)) => Err(AdapterError::from_source(e)),
        }
    }

    async fn process(&mut self, rows: &mut [Row], report: &mut UpdateReport) -> Result<(), Halt> {
        let templates = self.templates;
        let handlers = self.handlers;

        for entry in 0..report.rows.len() {
            if self.skip_rest {
                self.skip(report, entry);
                continue;
            }
            let (index, kind) = (report.rows[entry].index, report.rows[entry].kind);
            let Some(template) = templates.get(kind) else {
                return Err(Halt::MissingCommand { kind, row: index });
            };

            let mut command = template.bind(&rows[index], index);
            let mut event = RowUpdatingEvent {
                row: &rows[index],
                row_index: index,
                command: &mut command,
                kind,
                table: self.table,
                status: UpdateStatus::Continue,
                error: None,
            };
            for handler in handlers {
                handler.row_updating(&mut event).map_err(|e| Halt::Aborted {
                    row: index,
                    reason: e.to_string(),
                })?;
            }
            let (status, message) = (event.status, event.error);

            match status {
                UpdateStatus::Continue => {}
                UpdateStatus::SkipCurrentRow => {
                    self.skip(report, entry);
                    continue;
                }
                UpdateStatus::SkipAllRemainingRows => {
                    self.skip(report, entry);
                    self.skip_rest = true;
                    continue;
                }
                UpdateStatus::ErrorsOccurred => {
                    // rows queued ahead of this one settle first
                    self.flush(rows, report, FlushReason::Barrier).await?;
                    if self.skip_rest {
                        self.skip(report, entry);
                        continue;
                    }
                    let cause = RowError::Handler(
                        message.unwrap_or_else(|| "row updating handler reported errors".into()),
                    );
                    self.fail(rows, report, entry, cause)?;
                    continue;
                }
            }

            if self.engine.is_batching() {
                let position = self.engine.add(command);
                self.in_flight.push((entry, position));
                if self.engine.is_full() {
                    self.flush(rows, report, FlushReason::Full).await?;
                }
            } else {
                let outcome = self.engine.execute_single(self.executor, &command, self.cancel).await?;
                self.complete(rows, report, entry, &command, outcome)?;
            }
        }

        self.flush(rows, report, FlushReason::EndOfRows).await
    }

    /// Dispatch queued commands and settle their rows in queue order.
    async fn flush(
        &mut self,
        rows: &mut [Row],
        report: &mut UpdateReport,
        reason: FlushReason,
    ) -> Result<(), Halt> {
        if self.in_flight.is_empty() {
            return Ok(());
        }
        let affected = self.engine.execute(self.executor, reason, self.cancel).await?;
        debug!(table = self.table, affected, ?reason, "Batch settled");

        let in_flight = std::mem::take(&mut self.in_flight);
        let mut settled = Vec::with_capacity(in_flight.len());
        for (entry, position) in in_flight {
            match (self.engine.dispatched_command(position), self.engine.outcome(position)) {
                (Some(command), Some(outcome)) => settled.push((entry, command.clone(), outcome.clone())),
                _ => {
                    return Err(Halt::Source(SourceError::Transport(format!(
                        "no outcome for batch position {position}"
                    ))))
                }
            }
        }

        for (entry, command, outcome) in settled {
            if self.skip_rest {
                self.skip(report, entry);
                continue;
            }
            self.complete(rows, report, entry, &command, outcome)?;
        }
        Ok(())
    }

    /// Fire the Updated event for one row and move it to its terminal state.
    fn complete(
        &mut self,
        rows: &mut [Row],
        report: &mut UpdateReport,
        entry: usize,
        command: &Command,
        outcome: CommandOutcome,
    ) -> Result<(), Halt> {
        let (index, kind) = (report.rows[entry].index, report.rows[entry].kind);
        let preset = match &outcome {
            CommandOutcome::Error(failure) => Some(RowError::Command(failure.clone())),
            CommandOutcome::RowsAffected(n) if *n < command.expected_rows => Some(RowError::Concurrency {
                kind,
                expected: command.expected_rows,
                actual: *n,
            }),
            CommandOutcome::RowsAffected(_) => None,
        };
        let failed = preset.is_some();

        let mut event = RowUpdatedEvent {
            row: &rows[index],
            row_index: index,
            command,
            kind,
            table: self.table,
            outcome: &outcome,
            status: if failed {
                UpdateStatus::ErrorsOccurred
            } else {
                UpdateStatus::Continue
            },
            error: preset,
        };
        for handler in self.handlers {
            handler.row_updated(&mut event).map_err(|e| Halt::Aborted {
                row: index,
                reason: e.to_string(),
            })?;
        }
        let (status, error) = (event.status, event.error);

        let handler_error = || RowError::Handler("row updated handler reported errors".into());
        match status {
            UpdateStatus::Continue if failed => {
                debug!(table = self.table, row = index, "Row error suppressed by handler");
                self.skip(report, entry);
                Ok(())
            }
            UpdateStatus::Continue => {
                self.commit(rows, report, entry, outcome.rows_affected());
                Ok(())
            }
            UpdateStatus::ErrorsOccurred => {
                self.fail(rows, report, entry, error.unwrap_or_else(handler_error))
            }
            UpdateStatus::SkipCurrentRow => {
                self.skip(report, entry);
                Ok(())
            }
            UpdateStatus::SkipAllRemainingRows => {
                self.skip_rest = true;
                match error {
                    Some(cause) => self.fail(rows, report, entry, cause),
                    None => {
                        self.commit(rows, report, entry, outcome.rows_affected());
                        Ok(())
                    }
                }
            }
        }
    }

    fn commit(&mut self, rows: &mut [Row], report: &mut UpdateReport, entry: usize, rows_affected: u64) {
        let index = report.rows[entry].index;
        if self.policy.accept_changes {
            rows[index].accept_changes();
        } else {
            rows[index].clear_error();
        }
        report.rows[entry].status = RowStatus::Committed { rows_affected };
        metrics::record_row("committed");
    }

    fn skip(&mut self, report: &mut UpdateReport, entry: usize) {
        report.rows[entry].status = RowStatus::Skipped;
        metrics::record_row("skipped");
    }

    fn fail(
        &mut self,
        rows: &mut [Row],
        report: &mut UpdateReport,
        entry: usize,
        cause: RowError,
    ) -> Result<(), Halt> {
        let index = report.rows[entry].index;
        rows[index].set_error(cause.to_string());
        report.rows[entry].status = RowStatus::Failed(cause.clone());
        metrics::record_row("failed");

        if self.policy.continue_on_error {
            warn!(table = self.table, row = index, error = %cause, "Row update failed, continuing");
            Ok(())
        } else {
            Err(Halt::Row { row: index, cause })
        }
    }
}
