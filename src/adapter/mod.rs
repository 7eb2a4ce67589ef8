// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync adapter.
//!
//! [`SyncAdapter`] ties the pieces together: it owns the command slots,
//! resolves templates (slot first, then the attached command builder),
//! manages the connection and runs Fill, FillSchema and Update.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sync_adapter::{
//!     AdapterConfig, ColumnDef, DataType, InMemorySource, MemoryCommandBuilder, Row, SyncAdapter,
//!     Table, TableSchema,
//! };
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let schema = TableSchema::new(vec![ColumnDef::new("id", DataType::Integer).primary_key()]);
//! let source = Arc::new(InMemorySource::new().with_table("users", schema.clone(), vec![]));
//! let mut adapter = SyncAdapter::new(source, AdapterConfig::default())
//!     .with_command_builder(Arc::new(MemoryCommandBuilder));
//!
//! let mut users = Table::new("users", schema);
//! users.push(Row::new([("id", json!(1))]));
//! let report = adapter.update_table(&mut users, &CancellationToken::new()).await.unwrap();
//! assert_eq!(report.rows_affected(), 1);
//! # }
//! ```

mod connection;
mod fill;
mod update;

use std::sync::Arc;

use dashmap::DashMap;

use crate::command::StatementKind;
use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::slots::{CommandSlots, SlotChange, SlotObserver, TemplateRef};
use crate::source::traits::{CommandBuilder, DataSource};
use crate::table::TableSchema;
use crate::update::RowUpdateHandler;

/// Builder output cached per (table, role).
#[derive(Default)]
pub(crate) struct GeneratedCommands {
    templates: DashMap<(String, StatementKind), TemplateRef>,
}

impl GeneratedCommands {
    fn get(&self, table: &str, kind: StatementKind) -> Option<TemplateRef> {
        self.templates
            .get(&(table.to_string(), kind))
            .map(|t| Arc::clone(t.value()))
    }

    fn insert(&self, table: &str, kind: StatementKind, template: TemplateRef) {
        self.templates.insert((table.to_string(), kind), template);
    }

    fn len(&self) -> usize {
        self.templates.len()
    }
}

impl SlotObserver for GeneratedCommands {
    fn slot_changed(&self, _slots: &CommandSlots, change: &SlotChange) {
        self.templates.retain(|(_, kind), _| *kind != change.role);
    }
}

pub struct SyncAdapter {
    pub(super) config: AdapterConfig,
    pub(super) source: Arc<dyn DataSource>,
    pub(super) slots: CommandSlots,
    pub(super) builder: Option<Arc<dyn CommandBuilder>>,
    pub(super) generated: Arc<GeneratedCommands>,
    pub(super) handlers: Vec<Arc<dyn RowUpdateHandler>>,
    /// Round-trips performed by all updates so far
    pub(super) dispatches: u64,
}

impl SyncAdapter {
    /// Create an adapter over `source`. The command timeout is pushed to
    /// the connection right away.
    pub fn new(source: Arc<dyn DataSource>, config: AdapterConfig) -> Self {
        source.set_timeout(config.command_timeout());
        let slots = CommandSlots::new();
        let generated = Arc::new(GeneratedCommands::default());
        slots.subscribe(generated.clone());

        Self {
            config,
            source,
            slots,
            builder: None,
            generated,
            handlers: Vec::new(),
            dispatches: 0,
        }
    }

    /// Generate missing write commands with `builder`.
    #[must_use]
    pub fn with_command_builder(mut self, builder: Arc<dyn CommandBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn set_update_batch_size(&mut self, batch_size: usize) {
        self.config.update_batch_size = batch_size;
    }

    pub fn set_continue_update_on_error(&mut self, enabled: bool) {
        self.config.continue_update_on_error = enabled;
    }

    /// Change the command timeout (0 = none) and push it to the connection.
    pub fn set_command_timeout_ms(&mut self, timeout_ms: u64) {
        self.config.command_timeout_ms = timeout_ms;
        self.source.set_timeout(self.config.command_timeout());
    }

    #[must_use]
    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    #[must_use]
    pub fn slots(&self) -> &CommandSlots {
        &self.slots
    }

    /// Template held in `role`'s slot.
    #[must_use]
    pub fn command(&self, role: StatementKind) -> Option<TemplateRef> {
        self.slots.get(role)
    }

    pub fn set_command(&self, role: StatementKind, template: Option<TemplateRef>) {
        self.slots.set(role, template);
    }

    /// Observe slot changes (in addition to the adapter's own cache).
    pub fn subscribe_slots(&self, observer: Arc<dyn SlotObserver>) {
        self.slots.subscribe(observer);
    }

    pub fn add_handler(&mut self, handler: Arc<dyn RowUpdateHandler>) {
        self.handlers.push(handler);
    }

    /// Round-trips performed by updates over the adapter's lifetime.
    #[must_use]
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    /// Template for `kind`: the slot's when set, otherwise one generated by
    /// the command builder (cached until that slot changes).
    pub(super) fn resolve_template(
        &self,
        kind: StatementKind,
        table: &str,
        schema: &TableSchema,
    ) -> Result<Option<TemplateRef>, AdapterError> {
        if let Some(template) = self.slots.get(kind) {
            return Ok(Some(template));
        }
        let Some(builder) = &self.builder else {
            return Ok(None);
        };
        if let Some(template) = self.generated.get(table, kind) {
            return Ok(Some(template));
        }

        let template = Arc::new(
            builder
                .build(table, schema, kind)
                .map_err(|source| AdapterError::CommandGeneration { kind, source })?,
        );
        tracing::debug!(table, %kind, cached = self.generated.len() + 1, "Generated command template");
        self.generated.insert(table, kind, Arc::clone(&template));
        Ok(Some(template))
    }
}

impl std::fmt::Debug for SyncAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAdapter")
            .field("config", &self.config)
            .field("slots", &self.slots)
            .field("has_builder", &self.builder.is_some())
            .field("handlers", &self.handlers.len())
            .field("dispatches", &self.dispatches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandTemplate;
    use crate::source::memory::{InMemorySource, MemoryCommandBuilder};
    use crate::table::{ColumnDef, DataType};

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnDef::new("id", DataType::Integer).primary_key(),
            ColumnDef::new("name", DataType::Text),
        ])
    }

    fn adapter() -> SyncAdapter {
        SyncAdapter::new(Arc::new(InMemorySource::new()), AdapterConfig::default())
            .with_command_builder(Arc::new(MemoryCommandBuilder))
    }

    #[test]
    fn test_new_pushes_timeout_to_connection() {
        let mut adapter = adapter();
        assert_eq!(adapter.source().timeout(), Some(std::time::Duration::from_secs(30)));
        adapter.set_command_timeout_ms(0);
        assert_eq!(adapter.source().timeout(), None);
    }

    #[test]
    fn test_slot_template_wins_over_builder() {
        let adapter = adapter();
        let manual = Arc::new(CommandTemplate::new(StatementKind::Insert, "users", "custom insert"));
        adapter.set_command(StatementKind::Insert, Some(manual.clone()));

        let resolved = adapter
            .resolve_template(StatementKind::Insert, "users", &schema())
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&resolved, &manual));
    }

    #[test]
    fn test_generated_templates_are_cached_until_slot_changes() {
        let adapter = adapter();
        let first = adapter
            .resolve_template(StatementKind::Update, "users", &schema())
            .unwrap()
            .unwrap();
        let again = adapter
            .resolve_template(StatementKind::Update, "users", &schema())
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        // any write to the slot drops the cached entry for that role
        let manual = Arc::new(CommandTemplate::new(StatementKind::Update, "users", "manual"));
        adapter.set_command(StatementKind::Update, Some(manual));
        adapter.set_command(StatementKind::Update, None);

        let regenerated = adapter
            .resolve_template(StatementKind::Update, "users", &schema())
            .unwrap()
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &regenerated));
    }

    #[test]
    fn test_builder_failure_is_reported() {
        let adapter = adapter();
        let err = adapter
            .resolve_template(StatementKind::Delete, "empty", &TableSchema::default())
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::CommandGeneration {
                kind: StatementKind::Delete,
                ..
            }
        ));
    }

    #[test]
    fn test_without_builder_nothing_resolves() {
        let adapter = SyncAdapter::new(Arc::new(InMemorySource::new()), AdapterConfig::default());
        assert!(adapter
            .resolve_template(StatementKind::Insert, "users", &schema())
            .unwrap()
            .is_none());
    }
}
