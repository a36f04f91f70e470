//! Bounded fan-out of chunk work onto blocking workers.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::task::JoinError;

/// Run `work` on every item of `items` on the blocking pool, at most `width`
/// at a time, yielding results in input order.
///
/// Items are pulled from `items` only when a worker slot frees up, so a
/// bounded upstream channel is never drained faster than work completes.
pub fn ordered_pool<S, T, R, F>(
    items: S,
    width: usize,
    work: Arc<F>,
) -> impl Stream<Item = Result<R, JoinError>>
where
    S: Stream<Item = T>,
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    items
        .map(move |item| {
            let work = Arc::clone(&work);
            tokio::task::spawn_blocking(move || work(item))
        })
        .buffered(width.max(1))
}
