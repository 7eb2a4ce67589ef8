// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batching engine for write commands.
//!
//! The [`BatchingEngine`] collects bound commands and sends them to the
//! source in as few round-trips as the batch size allows. Each command keeps
//! its own outcome: a constraint violation on one command does not hide the
//! results of the others, only a transport failure fails the whole dispatch.
//!
//! Batch size `0` and `1` both mean "no batching"; callers then use
//! [`BatchingEngine::execute_single`] per command.
//!
//! # Example
//!
//! ```
//! use sync_adapter::{BatchingEngine, CommandTemplate, Row, StatementKind};
//! use serde_json::json;
//!
//! let template = CommandTemplate::new(StatementKind::Insert, "users", "insert users");
//! let mut engine = BatchingEngine::new(10);
//! assert!(engine.is_batching());
//!
//! let first = engine.add(template.bind(&Row::new([("id", json!(1))]), 0));
//! let second = engine.add(template.bind(&Row::new([("id", json!(2))]), 1));
//! assert_eq!((first, second), (0, 1));
//!
//! engine.clear();
//! assert!(engine.is_empty());
//! ```

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{Command, CommandOutcome};
use crate::metrics;
use crate::source::traits::{CommandExecutor, SourceError};
use crate::source::{guarded, DispatchError};

/// Why a batch went out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Batch reached the configured size
    Full,
    /// No more rows to add
    EndOfRows,
    /// A row outside the batch needs earlier rows settled first
    Barrier,
}

/// Commands accumulated for the next dispatch
#[derive(Debug)]
pub struct CommandBatch {
    pub commands: Vec<Command>,
    pub created_at: Instant,
}

impl CommandBatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            created_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Hand the commands over for dispatch and start a fresh batch.
    pub fn take(&mut self) -> Vec<Command> {
        self.created_at = Instant::now();
        std::mem::take(&mut self.commands)
    }
}

impl Default for CommandBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Open engine session (stands in for a driver-side batch handle).
#[derive(Debug)]
struct Session {
    started: Instant,
    dispatches: u64,
}

pub struct BatchingEngine {
    batch_size: usize,
    timeout: Option<Duration>,
    pending: CommandBatch,
    /// Commands of the last dispatched batch, read-only
    dispatched: Vec<Command>,
    /// Outcomes of the last dispatched batch, by position
    outcomes: Vec<CommandOutcome>,
    session: Option<Session>,
    dispatch_count: u64,
}

impl BatchingEngine {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            timeout: None,
            pending: CommandBatch::new(),
            dispatched: Vec::new(),
            outcomes: Vec::new(),
            session: None,
            dispatch_count: 0,
        }
    }

    /// Bound every dispatch by `timeout` (`None` waits forever).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// True batching only for sizes above one.
    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.batch_size > 1
    }

    /// Start a session. Called implicitly by the first `add`.
    pub fn initialize(&mut self) {
        if self.session.is_none() {
            self.session = Some(Session {
                started: Instant::now(),
                dispatches: 0,
            });
        }
    }

    /// Append a command and return its position in the current batch.
    /// Never performs I/O.
    pub fn add(&mut self, command: Command) -> usize {
        self.initialize();
        self.pending.commands.push(command);
        self.pending.len() - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the current batch should be flushed before adding more.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.batch_size.max(1)
    }

    /// Drop accumulated, not yet dispatched commands.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "Pending command batch cleared");
        }
        self.pending.take();
    }

    /// Dispatch the current batch in one round-trip.
    ///
    /// On success every position of the batch has an outcome and the sum of
    /// rows affected by successful commands is returned. Command-level
    /// failures are outcomes, not errors; only transport failure, timeout or
    /// cancellation fail the call. An empty batch dispatches nothing.
    pub async fn execute<E>(
        &mut self,
        executor: &E,
        reason: FlushReason,
        cancel: &CancellationToken,
    ) -> Result<u64, DispatchError>
    where
        E: CommandExecutor + ?Sized,
    {
        self.outcomes.clear();
        self.dispatched.clear();
        if self.pending.is_empty() {
            return Ok(0);
        }
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let age = self.pending.age();
        self.dispatched = self.pending.take();
        let count = self.dispatched.len();
        debug!(count, ?reason, age_ms = age.as_millis() as u64, "Dispatching command batch");

        let results = guarded(executor.execute_batch(&self.dispatched), self.timeout, cancel).await?;
        self.count_dispatch("batch");
        metrics::record_batch_size(count);

        if results.len() != count {
            return Err(DispatchError::Source(SourceError::Transport(format!(
                "source returned {} results for {} commands",
                results.len(),
                count
            ))));
        }

        self.outcomes = results.into_iter().map(CommandOutcome::from).collect();
        Ok(self
            .outcomes
            .iter()
            .filter(|o| !o.is_error())
            .map(CommandOutcome::rows_affected)
            .sum())
    }

    /// Execute one command immediately (non-batched mode).
    pub async fn execute_single<E>(
        &mut self,
        executor: &E,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, DispatchError>
    where
        E: CommandExecutor + ?Sized,
    {
        self.initialize();
        let result = guarded(executor.execute_non_query(command), self.timeout, cancel).await;
        match result {
            Ok(n) => {
                self.count_dispatch("single");
                Ok(CommandOutcome::RowsAffected(n))
            }
            Err(DispatchError::Source(SourceError::Command(failure))) => {
                self.count_dispatch("single");
                Ok(CommandOutcome::Error(failure))
            }
            Err(e) => Err(e),
        }
    }

    fn count_dispatch(&mut self, mode: &'static str) {
        self.dispatch_count += 1;
        if let Some(session) = self.session.as_mut() {
            session.dispatches += 1;
        }
        metrics::record_dispatch(mode);
    }

    /// Outcome for a position of the last dispatched batch.
    #[must_use]
    pub fn outcome(&self, position: usize) -> Option<&CommandOutcome> {
        self.outcomes.get(position)
    }

    /// Command at a position of the last dispatched batch.
    #[must_use]
    pub fn dispatched_command(&self, position: usize) -> Option<&Command> {
        self.dispatched.get(position)
    }

    /// Round-trips performed over the engine's lifetime.
    #[must_use]
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    /// Release everything the engine holds. Idempotent.
    pub fn terminate(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(
                dispatches = session.dispatches,
                elapsed_ms = session.started.elapsed().as_millis() as u64,
                "Batching session terminated"
            );
        }
        self.pending.take();
        self.dispatched.clear();
        self.outcomes.clear();
    }
}
