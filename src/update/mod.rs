// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisting changed rows.
//!
//! - [`machine`]: the per-row state machine driving commands through the
//!   batching engine
//! - [`events`]: Updating/Updated hooks for caller code
//! - [`report`]: per-row outcomes

pub mod events;
pub mod machine;
pub mod report;

pub use events::{HandlerError, RowUpdateHandler, RowUpdatedEvent, RowUpdatingEvent, UpdateStatus};
pub use machine::{RowUpdateStateMachine, UpdatePolicy, WriteTemplates};
pub use report::{RowError, RowReport, RowStatus, UpdateReport};
