//! Shared async utilities

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Error type for timeout operations
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },
    #[error("operation failed: {0}")]
    Operation(E),
}

/// Execute an async operation with a timeout
///
/// The wrapped future is dropped when the timeout elapses. Work it already
/// handed to a remote party is not cancelled.
pub async fn with_timeout<T, E, F>(
    operation: F,
    timeout_duration: Duration,
) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(timeout_duration, operation).await {
        Ok(result) => result.map_err(TimeoutError::Operation),
        Err(_) => Err(TimeoutError::Timeout {
            duration: timeout_duration,
        }),
    }
}
