// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Errors surfaced by adapter operations.

use thiserror::Error;

use crate::command::StatementKind;
use crate::source::traits::SourceError;
use crate::source::DispatchError;
use crate::update::{RowError, UpdateReport};

#[derive(Error, Debug)]
pub enum AdapterError {
    /// The connection could not be opened or broke.
    #[error("connection error: {0}")]
    Connection(#[source] SourceError),

    /// Mid-operation I/O failure (including timeouts).
    ///
    /// Carries no report. Rows settled before the failure were already
    /// accepted, so their row state tells which changes landed.
    #[error("transport error: {0}")]
    Transport(#[source] SourceError),

    #[error("schema discovery failed: {0}")]
    SchemaDiscovery(#[source] SourceError),

    /// Fill hit a table or column the target lacks under `MissingSchemaAction::Error`.
    #[error("missing schema: {0}")]
    MissingSchema(String),

    #[error("no {kind} command configured{}", .row.map(|r| format!(" (needed by row {r})")).unwrap_or_default())]
    MissingCommand {
        kind: StatementKind,
        row: Option<usize>,
    },

    #[error("command builder failed for {kind}: {source}")]
    CommandGeneration {
        kind: StatementKind,
        #[source]
        source: SourceError,
    },

    /// A row failed and continue-on-error was off.
    #[error("update failed at row {row}: {cause}")]
    Update {
        row: usize,
        cause: RowError,
        report: Box<UpdateReport>,
    },

    /// An event handler returned an error.
    #[error("update aborted by handler at row {row}: {reason}")]
    Aborted {
        row: usize,
        reason: String,
        report: Box<UpdateReport>,
    },

    #[error("operation cancelled")]
    Cancelled { report: Option<Box<UpdateReport>> },
}

impl AdapterError {
    /// Classify a transport-side failure: connection loss vs everything else.
    #[must_use]
    pub fn from_source(error: SourceError) -> Self {
        match error {
            SourceError::Connection(_) => Self::Connection(error),
            other => Self::Transport(other),
        }
    }

    /// Per-row progress made before the failure, when the operation was an update.
    /// `None` for connection and transport failures.
    #[must_use]
    pub fn report(&self) -> Option<&UpdateReport> {
        match self {
            Self::Update { report, .. } | Self::Aborted { report, .. } => Some(&**report),
            Self::Cancelled { report } => report.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<DispatchError> for AdapterError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Cancelled => Self::Cancelled { report: None },
            DispatchError::Source(source) => Self::from_source(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_classification() {
        assert!(matches!(
            AdapterError::from_source(SourceError::Connection("refused".into())),
            AdapterError::Connection(_)
        ));
        assert!(matches!(
            AdapterError::from_source(SourceError::Timeout(std::time::Duration::from_secs(1))),
            AdapterError::Transport(_)
        ));
        assert!(AdapterError::from(DispatchError::Cancelled).is_cancelled());
    }

    #[test]
    fn test_missing_command_display() {
        let err = AdapterError::MissingCommand {
            kind: StatementKind::Insert,
            row: Some(3),
        };
        assert_eq!(err.to_string(), "no insert command configured (needed by row 3)");
        let err = AdapterError::MissingCommand {
            kind: StatementKind::Select,
            row: None,
        };
        assert_eq!(err.to_string(), "no select command configured");
    }
}
