//! Asynchronous utilities for use with Tokio.

use crate::prelude::*;

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task, and turns cancellation into an ordinary error.
///
/// `lopdf` and `image` are CPU-bound and synchronous, so we keep them off the
/// executor threads.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(anyhow!("blocking task did not complete: {}", err)),
    }
}
