//! Row update events and handlers.
//!
//! Handlers see each row twice: before its command runs ([`RowUpdatingEvent`])
//! and after its outcome is known ([`RowUpdatedEvent`]). They steer the row
//! by setting [`UpdateStatus`]; returning `Err` aborts the whole update.

use crate::command::{Command, CommandOutcome, StatementKind};
use crate::table::Row;

use super::report::RowError;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateStatus {
    #[default]
    Continue,
    ErrorsOccurred,
    SkipCurrentRow,
    /// Stop processing: every later row is reported `Skipped` and left
    /// unaccepted.
    ///
    /// Set from an Updated event in batched mode, later rows of the same
    /// batch have already run at the source. They are still reported
    /// `Skipped` and keep their pending state, so updating them again may
    /// hit concurrency violations.
    SkipAllRemainingRows,
}

/// Fired before a row's command is executed or queued.
///
/// The command may be edited; the row is a read-only snapshot.
#[derive(Debug)]
pub struct RowUpdatingEvent<'a> {
    pub row: &'a Row,
    pub row_index: usize,
    pub command: &'a mut Command,
    pub kind: StatementKind,
    /// Name of the table being updated
    pub table: &'a str,
    pub status: UpdateStatus,
    /// Message used when `status` is set to `ErrorsOccurred`
    pub error: Option<String>,
}

/// Fired once the row's outcome is available.
///
/// Starts as `ErrorsOccurred` with `error` set when the command failed or
/// affected fewer rows than expected, otherwise `Continue`.
#[derive(Debug)]
pub struct RowUpdatedEvent<'a> {
    pub row: &'a Row,
    pub row_index: usize,
    pub command: &'a Command,
    pub kind: StatementKind,
    pub table: &'a str,
    pub outcome: &'a CommandOutcome,
    pub status: UpdateStatus,
    pub error: Option<RowError>,
}

impl RowUpdatedEvent<'_> {
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.outcome.rows_affected()
    }
}

pub trait RowUpdateHandler: Send + Sync {
    fn row_updating(&self, _event: &mut RowUpdatingEvent<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    fn row_updated(&self, _event: &mut RowUpdatedEvent<'_>) -> Result<(), HandlerError> {
        Ok(())
    }
}
