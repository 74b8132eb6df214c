//! Batch Task
//!
//! Runs one batch loader call and writes its results into the shared key
//! map on its own task, so a dropped `get_map` never strands keys it
//! marked pending.

use std::fmt;
use std::hash::Hash;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::cache::BatchJob;
use crate::error::Result;
use crate::tasks::load::unwind_safe;

/// Invokes the batch loader and spawns a task that settles every key of
/// `job`. A panicking batch loader rejects those keys like any batch error.
///
/// # Panics
/// Panics if called outside of a Tokio runtime.
pub(crate) fn spawn_batch<K, V>(job: BatchJob<K, V>) -> JoinHandle<Result<()>>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let load = unwind_safe(|| job.invoke());

    tokio::spawn(async move {
        trace!(load = %job.id, keys = job.keys.len(), "awaiting batch loader");
        let outcome = load.await;
        job.settle(outcome)
    })
}
