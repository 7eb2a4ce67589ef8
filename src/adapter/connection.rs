//! Connection handling around adapter operations.
//!
//! Operations open a closed connection and close it again when done. A
//! connection the caller opened stays open.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AdapterError;
use crate::metrics;
use crate::resilience::retry::retry_if;
use crate::source::traits::Connection;
use crate::source::{guarded, DispatchError};

use super::SyncAdapter;

impl SyncAdapter {
    /// Open the connection unless it is open already.
    /// Returns whether this call opened it.
    pub(super) async fn open_if_closed(&self, cancel: &CancellationToken) -> Result<bool, AdapterError> {
        if self.source.is_open() {
            return Ok(false);
        }

        let retry = self.config.connect_retry();
        let timeout = self.config.command_timeout();
        let source = Arc::clone(&self.source);

        let attempts = retry_if(
            "open connection",
            &retry,
            |e: &DispatchError| matches!(e, DispatchError::Source(_)),
            || {
                let source = Arc::clone(&source);
                async move {
                    let result = guarded(source.open(), timeout, cancel).await;
                    if result.is_err() {
                        metrics::record_connect_failure();
                    }
                    result
                }
            },
        );

        // backoff sleeps between attempts are suspension points too
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            result = attempts => result,
        };

        match opened {
            Ok(()) => {
                debug!("Connection opened for operation");
                Ok(true)
            }
            Err(DispatchError::Cancelled) => Err(AdapterError::Cancelled { report: None }),
            Err(DispatchError::Source(e)) => Err(AdapterError::Connection(e)),
        }
    }

    /// Close the connection if `opened` says this operation opened it.
    /// Close failures are logged, never returned.
    pub(super) async fn close_if_opened(&self, opened: bool) {
        if !opened {
            return;
        }
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close connection after operation");
        }
    }
}
