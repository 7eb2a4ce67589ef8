//! Data source capabilities and the in-memory reference source.

pub mod memory;
pub mod traits;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use traits::SourceError;

/// Failure of one guarded transport await.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("operation cancelled")]
    Cancelled,
}

/// Await a transport operation under the command timeout, aborting it
/// if `cancel` fires first. Cancellation is checked before the await starts.
pub(crate) async fn guarded<F, T>(
    operation: F,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<T, DispatchError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    if cancel.is_cancelled() {
        return Err(DispatchError::Cancelled);
    }

    let bounded = async move {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, operation).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(limit)),
            },
            None => operation.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DispatchError::Cancelled),
        result = bounded => result.map_err(DispatchError::from),
    }
}
