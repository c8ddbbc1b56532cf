//! Ordered bounded-concurrency map
//!
//! One task per item, gated by a semaphore; handles are awaited in input
//! order so `results[i]` always belongs to `items[i]`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::error;

use crate::errors::ControllerError;

/// Run `op` over `items` concurrently and return results in input order.
///
/// `max_parallelism` of `None` runs every item at once. A panicking worker
/// yields `Internal` at its position.
pub async fn map_ordered<I, T, F, Fut>(
    items: Vec<I>,
    max_parallelism: Option<usize>,
    mut op: F,
) -> Vec<Result<T, ControllerError>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<T, ControllerError>> + Send + 'static,
{
    if items.is_empty() {
        return Vec::new();
    }

    let permits = max_parallelism.unwrap_or(items.len()).clamp(1, items.len());
    let semaphore = Arc::new(Semaphore::new(permits));
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        let sem = Arc::clone(&semaphore);
        let fut = op(item);
        handles.push(tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| ControllerError::Internal(format!("worker pool closed: {}", e)))?;
            fut.await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Worker failed: {}", e);
                Err(e.into())
            }
        });
    }
    results
}
