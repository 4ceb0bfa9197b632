//! Timeout utility.
//!
//! No fetch timeout is applied unless one is configured; callers pass
//! `None` to run the operation unbounded.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::ElegantoError;

/// Run an operation with a timeout.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> Result<T, ElegantoError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation())
        .await
        .map_err(|_| {
            debug!(?timeout, "Operation timed out");
            ElegantoError::Timeout(timeout)
        })
}

/// Run an operation with an optional timeout.
pub async fn with_optional_timeout<T, F, Fut>(
    timeout: Option<Duration>,
    operation: F,
) -> Result<T, ElegantoError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    match timeout {
        Some(timeout) => with_timeout(timeout, operation).await,
        None => Ok(operation().await),
    }
}
