// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Command templates and bound commands.
//!
//! A [`CommandTemplate`] is the reusable prototype stored in a command slot:
//! statement kind, target table, opaque statement text (produced by a
//! [`CommandBuilder`](crate::source::traits::CommandBuilder) or the caller),
//! and parameter bindings that say which row column feeds which parameter.
//!
//! [`CommandTemplate::bind`] turns a template into a [`Command`] for one row.
//!
//! ```
//! use sync_adapter::{CommandTemplate, ParameterBinding, Row, StatementKind};
//! use serde_json::json;
//!
//! let template = CommandTemplate::new(StatementKind::Insert, "users", "insert users")
//!     .with_binding(ParameterBinding::input("@id", "id"))
//!     .with_binding(ParameterBinding::input("@name", "name"));
//!
//! let row = Row::new([("id", json!(7)), ("name", json!("Ada"))]);
//! let command = template.bind(&row, 0);
//! assert_eq!(command.parameter("@name").unwrap().value, json!("Ada"));
//! ```

use parking_lot::Mutex;
use serde_json::Value;

use crate::slots::SlotBinding;
use crate::source::traits::CommandFailure;
use crate::table::{Row, RowState, RowVersion};

/// The four command roles of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub const ALL: [Self; 4] = [Self::Select, Self::Insert, Self::Update, Self::Delete];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Select => 0,
            Self::Insert => 1,
            Self::Update => 2,
            Self::Delete => 3,
        }
    }

    /// Write statement needed to persist a row in the given state.
    #[must_use]
    pub fn for_row_state(state: RowState) -> Option<Self> {
        match state {
            RowState::Added => Some(Self::Insert),
            RowState::Modified => Some(Self::Update),
            RowState::Deleted => Some(Self::Delete),
            RowState::Unchanged | RowState::Detached => None,
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Select => write!(f, "select"),
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParameterDirection {
    /// Whether the parameter takes its value from the row.
    #[must_use]
    pub fn reads_row(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }
}

/// Maps one statement parameter to a row column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterBinding {
    pub name: String,
    pub source_column: String,
    pub direction: ParameterDirection,
    pub version: RowVersion,
}

impl ParameterBinding {
    /// Input parameter fed from the current value of `column`.
    pub fn input(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_column: column.into(),
            direction: ParameterDirection::Input,
            version: RowVersion::Current,
        }
    }

    /// Input parameter fed from the original value of `column`
    /// (key and concurrency checks of update/delete statements).
    pub fn original(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            version: RowVersion::Original,
            ..Self::input(name, column)
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Reusable, parameterized command prototype held in a slot.
#[derive(Debug)]
pub struct CommandTemplate {
    kind: StatementKind,
    table: String,
    text: String,
    bindings: Vec<ParameterBinding>,
    expected_rows: u64,
    /// Slot attachments; maintained by `CommandSlots`.
    attachments: Mutex<Vec<SlotBinding>>,
}

impl Clone for CommandTemplate {
    /// Clones are detached: slot attachments belong to the original.
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            table: self.table.clone(),
            text: self.text.clone(),
            bindings: self.bindings.clone(),
            expected_rows: self.expected_rows,
            attachments: Mutex::new(Vec::new()),
        }
    }
}

impl CommandTemplate {
    pub fn new(kind: StatementKind, table: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            text: text.into(),
            bindings: Vec::new(),
            expected_rows: 1,
            attachments: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_binding(mut self, binding: ParameterBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Rows a successful execution must affect (default 1).
    #[must_use]
    pub fn with_expected_rows(mut self, expected: u64) -> Self {
        self.expected_rows = expected;
        self
    }

    #[must_use]
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn bindings(&self) -> &[ParameterBinding] {
        &self.bindings
    }

    #[must_use]
    pub fn expected_rows(&self) -> u64 {
        self.expected_rows
    }

    /// Number of slots this template is currently attached to.
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachments.lock().len()
    }

    pub(crate) fn is_attached_to(&self, binding: SlotBinding) -> bool {
        self.attachments.lock().iter().filter(|b| **b == binding).count() == 1
    }

    pub(crate) fn attach(&self, binding: SlotBinding) {
        let mut attachments = self.attachments.lock();
        if !attachments.contains(&binding) {
            attachments.push(binding);
        }
    }

    pub(crate) fn detach(&self, binding: SlotBinding) {
        self.attachments.lock().retain(|b| *b != binding);
    }

    /// Bind this template to one row.
    #[must_use]
    pub fn bind(&self, row: &Row, row_index: usize) -> Command {
        let parameters = self
            .bindings
            .iter()
            .map(|b| BoundParameter {
                name: b.name.clone(),
                source_column: b.source_column.clone(),
                direction: b.direction,
                version: b.version,
                value: if b.direction.reads_row() {
                    row.get_version(&b.source_column, b.version)
                        .cloned()
                        .unwrap_or(Value::Null)
                } else {
                    Value::Null
                },
            })
            .collect();

        Command {
            kind: self.kind,
            table: self.table.clone(),
            text: self.text.clone(),
            parameters,
            row_index,
            expected_rows: self.expected_rows,
        }
    }
}

/// A parameter with its value resolved from a row.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub name: String,
    pub source_column: String,
    pub direction: ParameterDirection,
    pub version: RowVersion,
    pub value: Value,
}

/// A write (or select) command bound to one row.
///
/// Mutable while the Updating event runs; once handed to the batching
/// engine it is owned there and never changed again.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: StatementKind,
    pub table: String,
    pub text: String,
    pub parameters: Vec<BoundParameter>,
    /// Position of the owning row in the slice being updated
    pub row_index: usize,
    pub expected_rows: u64,
}

impl Command {
    /// Unbound command from a template (selects, schema reads).
    #[must_use]
    pub fn unbound(template: &CommandTemplate) -> Self {
        Self {
            kind: template.kind,
            table: template.table.clone(),
            text: template.text.clone(),
            parameters: Vec::new(),
            row_index: 0,
            expected_rows: template.expected_rows,
        }
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&BoundParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Replace a parameter value. Returns false when no such parameter exists.
    pub fn set_parameter(&mut self, name: &str, value: Value) -> bool {
        match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(p) => {
                p.value = value;
                true
            }
            None => false,
        }
    }
}

/// Result of one executed command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    RowsAffected(u64),
    Error(CommandFailure),
}

impl CommandOutcome {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Rows affected, zero for errors.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        match self {
            Self::RowsAffected(n) => *n,
            Self::Error(_) => 0,
        }
    }
}

impl From<Result<u64, CommandFailure>> for CommandOutcome {
    fn from(result: Result<u64, CommandFailure>) -> Self {
        match result {
            Ok(n) => Self::RowsAffected(n),
            Err(f) => Self::Error(f),
        }
    }
}
