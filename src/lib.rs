//! # Sync Adapter
//!
//! Client-side synchronization between in-memory tables and a relational
//! data source: read rows into tables (Fill), discover table schema
//! (FillSchema) and write row changes back (Update).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SyncAdapter                          │
//! │  • Fill / FillSchema / Update, async and blocking           │
//! │  • Opens and closes the connection around each call         │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                 │
//!            ▼                                 ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │      CommandSlots        │   │    RowUpdateStateMachine     │
//! │  • select/insert/update/ │   │  • Updating / Updated events │
//! │    delete templates      │   │  • fail-fast or continue     │
//! │  • reentrant observers   │   │  • per-row report            │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                                              │
//!                                              ▼
//!                               ┌──────────────────────────────┐
//!                               │       BatchingEngine         │
//!                               │  • N commands per round-trip │
//!                               │  • per-command outcomes      │
//!                               └──────────────────────────────┘
//!                                              │
//!                                              ▼
//!                               ┌──────────────────────────────┐
//!                               │   DataSource (driver side)   │
//!                               │  Connection + CommandExecutor│
//!                               └──────────────────────────────┘
//! ```
//!
//! ## Quick Start
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
//! #[tokio::main]
//! async fn main() {
//!     let schema = TableSchema::new(vec![
//!         ColumnDef::new("id", DataType::Integer).primary_key(),
//!         ColumnDef::new("name", DataType::Text),
//!     ]);
//!     let source = Arc::new(InMemorySource::new().with_table("users", schema.clone(), vec![]));
//!
//!     let config = AdapterConfig {
//!         update_batch_size: 100,
//!         ..Default::default()
//!     };
//!     let mut adapter = SyncAdapter::new(source, config)
//!         .with_command_builder(Arc::new(MemoryCommandBuilder));
//!
//!     let mut users = Table::new("users", schema);
//!     users.push(Row::new([("id", json!(1)), ("name", json!("Ada"))]));
//!
//!     let report = adapter
//!         .update_table(&mut users, &CancellationToken::new())
//!         .await
//!         .expect("update failed");
//!     println!("{} rows written", report.rows_affected());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`adapter`]: the [`SyncAdapter`] orchestrating everything
//! - [`update`]: row update state machine, events and reports
//! - [`batching`]: batching engine for write commands
//! - [`slots`]: reentrancy-safe command slot store
//! - [`source`]: data source traits and the in-memory source
//! - [`blocking`]: synchronous wrapper
//! - [`resilience`]: connection retry

pub mod adapter;
pub mod batching;
pub mod blocking;
pub mod command;
pub mod config;
pub mod error;
pub mod metrics;
pub mod resilience;
pub mod slots;
pub mod source;
pub mod table;
pub mod update;

pub use adapter::SyncAdapter;
pub use batching::command_batcher::{BatchingEngine, CommandBatch, FlushReason};
pub use blocking::BlockingSyncAdapter;
pub use command::{
    BoundParameter, Command, CommandOutcome, CommandTemplate, ParameterBinding, ParameterDirection, StatementKind,
};
pub use config::{AdapterConfig, MissingSchemaAction};
pub use error::AdapterError;
pub use metrics::LatencyTimer;
pub use resilience::retry::RetryConfig;
pub use slots::{CommandSlots, SlotChange, SlotObserver, TemplateRef};
pub use source::memory::{InMemorySource, MemoryCommandBuilder};
pub use source::traits::{
    CommandBuilder, CommandExecutor, CommandFailure, Connection, DataSource, RowStream, SourceError, Transaction,
};
pub use source::DispatchError;
pub use table::{ColumnDef, DataSet, DataType, Row, RowState, RowVersion, Table, TableSchema};
pub use update::{
    HandlerError, RowError, RowReport, RowStatus, RowUpdateHandler, RowUpdateStateMachine, RowUpdatedEvent,
    RowUpdatingEvent, UpdatePolicy, UpdateReport, UpdateStatus, WriteTemplates,
};
