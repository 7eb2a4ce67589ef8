// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Blocking API.
//!
//! [`BlockingSyncAdapter`] wraps a [`SyncAdapter`] and drives it on a private
//! current-thread runtime, so results match the async API exactly. Must not
//! be used from inside an async context.
//!
//! ```
//! use std::sync::Arc;
//! use sync_adapter::{AdapterConfig, BlockingSyncAdapter, DataSet, InMemorySource};
//!
//! let source = Arc::new(InMemorySource::new());
//! let mut adapter = BlockingSyncAdapter::new(source, AdapterConfig::default()).unwrap();
//! // no select command configured yet
//! assert!(adapter.fill(&mut DataSet::new()).is_err());
//! ```

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use crate::adapter::SyncAdapter;
use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::source::traits::DataSource;
use crate::table::{DataSet, Row, Table, TableSchema};
use crate::update::UpdateReport;

pub struct BlockingSyncAdapter {
    runtime: Runtime,
    inner: SyncAdapter,
}

impl BlockingSyncAdapter {
    pub fn new(source: Arc<dyn DataSource>, config: AdapterConfig) -> std::io::Result<Self> {
        Self::from_adapter(SyncAdapter::new(source, config))
    }

    /// Wrap an adapter that is already configured.
    pub fn from_adapter(inner: SyncAdapter) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime, inner })
    }

    #[must_use]
    pub fn inner(&self) -> &SyncAdapter {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SyncAdapter {
        &mut self.inner
    }

    pub fn into_inner(self) -> SyncAdapter {
        self.inner
    }

    pub fn fill(&mut self, target: &mut DataSet) -> Result<usize, AdapterError> {
        let cancel = CancellationToken::new();
        self.runtime.block_on(self.inner.fill(target, &cancel))
    }

    pub fn fill_table(&mut self, table: &mut Table) -> Result<usize, AdapterError> {
        let cancel = CancellationToken::new();
        self.runtime.block_on(self.inner.fill_table(table, &cancel))
    }

    pub fn fill_schema(&mut self, target: &mut DataSet) -> Result<Vec<TableSchema>, AdapterError> {
        let cancel = CancellationToken::new();
        self.runtime.block_on(self.inner.fill_schema(target, &cancel))
    }

    pub fn update_table(&mut self, table: &mut Table) -> Result<UpdateReport, AdapterError> {
        let cancel = CancellationToken::new();
        self.runtime.block_on(self.inner.update_table(table, &cancel))
    }

    pub fn update_rows(
        &mut self,
        table: &str,
        schema: &TableSchema,
        rows: &mut [Row],
    ) -> Result<UpdateReport, AdapterError> {
        let cancel = CancellationToken::new();
        self.runtime.block_on(self.inner.update_rows(table, schema, rows, &cancel))
    }
}
