//! Per-row results of an update.

use serde_json::Value;
use thiserror::Error;

use crate::command::StatementKind;
use crate::source::traits::CommandFailure;

/// Why a single row failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    /// The source rejected the row's command.
    #[error("command error: {0}")]
    Command(CommandFailure),

    /// The command ran but touched fewer rows than expected.
    #[error("concurrency violation: {kind} affected {actual} of the expected {expected} rows")]
    Concurrency {
        kind: StatementKind,
        expected: u64,
        actual: u64,
    },

    /// An event handler flagged the row as failed.
    #[error("handler reported error: {0}")]
    Handler(String),
}

/// Where a row ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum RowStatus {
    /// Not processed (yet)
    Pending,
    Committed { rows_affected: u64 },
    Skipped,
    Failed(RowError),
    /// Abandoned because the operation was cancelled
    Cancelled,
}

impl RowStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed { .. } => "committed",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Committed { rows_affected } => write!(f, "Committed({})", rows_affected),
            Self::Failed(e) => write!(f, "Failed({})", e),
            Self::Pending => write!(f, "Pending"),
            Self::Skipped => write!(f, "Skipped"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Result for one row that needed persisting.
#[derive(Debug, Clone, PartialEq)]
pub struct RowReport {
    /// Position of the row in the slice passed to the update
    pub index: usize,
    pub kind: StatementKind,
    /// Identity column value, when the schema has one
    pub key: Option<Value>,
    pub status: RowStatus,
}

/// Outcome of an update, one entry per changed row, in row order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub rows: Vec<RowReport>,
}

impl UpdateReport {
    /// Sum of rows affected over committed rows only.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows
            .iter()
            .map(|r| match r.status {
                RowStatus::Committed { rows_affected } => rows_affected,
                _ => 0,
            })
            .sum()
    }

    /// Status of the row at `index` in the updated slice.
    #[must_use]
    pub fn status_of(&self, index: usize) -> Option<&RowStatus> {
        self.rows.iter().find(|r| r.index == index).map(|r| &r.status)
    }

    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.rows.iter().filter(|r| r.status.label() == label).count()
    }

    #[must_use]
    pub fn committed(&self) -> usize {
        self.count("committed")
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.rows.iter().all(|r| matches!(r.status, RowStatus::Committed { .. } | RowStatus::Skipped))
    }

    /// Failed rows with their cause, in row order.
    pub fn errors(&self) -> impl Iterator<Item = (usize, &RowError)> {
        self.rows.iter().filter_map(|r| match &r.status {
            RowStatus::Failed(e) => Some((r.index, e)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, status: RowStatus) -> RowReport {
        RowReport {
            index,
            kind: StatementKind::Update,
            key: None,
            status,
        }
    }

    #[test]
    fn test_rows_affected_counts_committed_only() {
        let report = UpdateReport {
            rows: vec![
                entry(0, RowStatus::Committed { rows_affected: 1 }),
                entry(1, RowStatus::Failed(RowError::Handler("x".into()))),
                entry(4, RowStatus::Committed { rows_affected: 2 }),
                entry(5, RowStatus::Skipped),
            ],
        };
        assert_eq!(report.rows_affected(), 3);
        assert_eq!(report.committed(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(!report.is_success());
        assert_eq!(report.status_of(5), Some(&RowStatus::Skipped));
        assert_eq!(report.status_of(2), None);
        assert_eq!(report.errors().map(|(i, _)| i).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RowStatus::Committed { rows_affected: 1 }.to_string(), "Committed(1)");
        assert_eq!(RowStatus::Cancelled.to_string(), "Cancelled");
        let concurrency = RowError::Concurrency {
            kind: StatementKind::Delete,
            expected: 1,
            actual: 0,
        };
        assert_eq!(
            concurrency.to_string(),
            "concurrency violation: delete affected 0 of the expected 1 rows"
        );
        assert!(!RowStatus::Pending.is_terminal());
        assert!(RowStatus::Skipped.is_terminal());
    }
}
