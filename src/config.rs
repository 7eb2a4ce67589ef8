//! Configuration for the sync adapter.
//!
//! # Example
//!
//! ```
//! use sync_adapter::{AdapterConfig, MissingSchemaAction};
//!
//! // Defaults: unbatched, fail fast
//! let config = AdapterConfig::default();
//! assert_eq!(config.update_batch_size, 1);
//! assert!(!config.continue_update_on_error);
//!
//! let config = AdapterConfig {
//!     update_batch_size: 50,
//!     continue_update_on_error: true,
//!     missing_schema_action: MissingSchemaAction::AddWithKey,
//!     ..Default::default()
//! };
//! assert!(config.command_timeout().is_some());
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::resilience::retry::RetryConfig;

/// What Fill does when a result set names a table or column the target lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSchemaAction {
    /// Create the missing table/column
    #[default]
    Add,
    /// Like `Add`, and also mark key columns reported by the source
    AddWithKey,
    /// Drop data for unknown tables/columns
    Ignore,
    /// Fail the Fill
    Error,
}

/// Configuration for one adapter.
///
/// All fields have defaults, so an empty document deserializes.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Commands per round-trip during Update. 0 and 1 disable batching.
    #[serde(default = "default_update_batch_size")]
    pub update_batch_size: usize,

    /// Record row failures and keep going instead of stopping
    #[serde(default)]
    pub continue_update_on_error: bool,

    /// Accept changes on rows that were persisted successfully
    #[serde(default = "default_true")]
    pub accept_changes_during_update: bool,

    /// Loaded rows start out Unchanged (otherwise Added)
    #[serde(default = "default_true")]
    pub accept_changes_during_fill: bool,

    #[serde(default)]
    pub missing_schema_action: MissingSchemaAction,

    /// Per-command timeout in milliseconds (0 = wait forever)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Connection open retry
    #[serde(default = "default_connect_max_retries")]
    pub connect_max_retries: usize,
    #[serde(default = "default_connect_initial_delay_ms")]
    pub connect_initial_delay_ms: u64,
    #[serde(default = "default_connect_max_delay_ms")]
    pub connect_max_delay_ms: u64,
}

fn default_update_batch_size() -> usize { 1 }
fn default_true() -> bool { true }
fn default_command_timeout_ms() -> u64 { 30_000 }
fn default_connect_max_retries() -> usize { 3 }
fn default_connect_initial_delay_ms() -> u64 { 100 }
fn default_connect_max_delay_ms() -> u64 { 2_000 }

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            update_batch_size: default_update_batch_size(),
            continue_update_on_error: false,
            accept_changes_during_update: default_true(),
            accept_changes_during_fill: default_true(),
            missing_schema_action: MissingSchemaAction::default(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_max_retries: default_connect_max_retries(),
            connect_initial_delay_ms: default_connect_initial_delay_ms(),
            connect_max_delay_ms: default_connect_max_delay_ms(),
        }
    }
}

impl AdapterConfig {
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }

    /// Backoff used when opening the connection.
    #[must_use]
    pub fn connect_retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: Some(self.connect_max_retries.max(1)),
            initial_delay: Duration::from_millis(self.connect_initial_delay_ms),
            max_delay: Duration::from_millis(self.connect_max_delay_ms),
            factor: 2.0,
        }
    }
}
