// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capabilities the adapter consumes from the data source.
//!
//! The adapter never speaks a wire protocol itself. A driver supplies a
//! [`Connection`] and a [`CommandExecutor`] (together a [`DataSource`]),
//! readers come back as [`RowStream`]s, and statement text comes from a
//! [`CommandBuilder`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::command::{Command, CommandTemplate, StatementKind};
use crate::table::{ColumnDef, TableSchema};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("connection unavailable: {0}")]
    Connection(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("command failed: {0}")]
    Command(CommandFailure),
    #[error("schema discovery failed: {0}")]
    Schema(String),
}

impl SourceError {
    /// Only per-command failures are recoverable at row granularity.
    #[must_use]
    pub fn is_row_level(&self) -> bool {
        matches!(self, Self::Command(_))
    }
}

/// A single command rejected by the source (constraint violation, bad value, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub code: Option<String>,
    pub message: String,
}

impl CommandFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CommandFailure {}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn open(&self) -> Result<(), SourceError>;
    async fn close(&self) -> Result<(), SourceError>;
    fn is_open(&self) -> bool;

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, SourceError>;

    /// Per-command timeout applied by the driver. `None` waits forever.
    fn set_timeout(&self, timeout: Option<Duration>);
    fn timeout(&self) -> Option<Duration>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn commit(&mut self) -> Result<(), SourceError>;
    async fn rollback(&mut self) -> Result<(), SourceError>;
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a write and return rows affected.
    /// `SourceError::Command` means the source rejected this command only.
    async fn execute_non_query(&self, command: &Command) -> Result<u64, SourceError>;

    async fn execute_reader(&self, command: &Command) -> Result<Box<dyn RowStream>, SourceError>;

    /// Execute a batch in one round-trip and return one result per command,
    /// in order. The outer error is reserved for transport failures.
    /// Default implementation falls back to sequential execution.
    async fn execute_batch(
        &self,
        commands: &[Command],
    ) -> Result<Vec<Result<u64, CommandFailure>>, SourceError> {
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            match self.execute_non_query(command).await {
                Ok(n) => results.push(Ok(n)),
                Err(SourceError::Command(failure)) => results.push(Err(failure)),
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }
}

/// Lazy, single-pass reader over one or more result sets.
#[async_trait]
pub trait RowStream: Send {
    /// Columns of the current result set.
    fn columns(&self) -> &[ColumnDef];

    /// Next row of the current result set, values in column order.
    async fn next_row(&mut self) -> Result<Option<Vec<Value>>, SourceError>;

    /// Advance to the next result set. Returns false when there is none.
    async fn next_result(&mut self) -> Result<bool, SourceError>;
}

/// Produces write templates for a table. Statement text is opaque to the adapter.
pub trait CommandBuilder: Send + Sync {
    fn build(
        &self,
        table: &str,
        schema: &TableSchema,
        kind: StatementKind,
    ) -> Result<CommandTemplate, SourceError>;
}

/// A connection that can also execute commands.
pub trait DataSource: Connection + CommandExecutor {}

impl<T: Connection + CommandExecutor + ?Sized> DataSource for T {}
