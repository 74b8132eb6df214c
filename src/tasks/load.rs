//! Load Task
//!
//! Runs one loader invocation on its own task so that the load outlives any
//! single caller: dropping a `get` future never cancels a load other
//! waiters share.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::cache::{LoadId, MemoShared};

/// Invokes the loader and spawns a task that settles the outcome.
///
/// The loader itself is called synchronously, so its invocation is
/// observable as soon as the idle to pending transition returns. Only the
/// returned future runs on the spawned task. A panicking loader settles
/// as a rejection.
///
/// # Arguments
/// * `shared` - the memo whose loader to run and whose store to settle
/// * `id` - load id written into the store by the idle to pending transition
///
/// # Panics
/// Panics if called outside of a Tokio runtime.
pub(crate) fn spawn_load<T>(shared: Arc<MemoShared<T>>, id: LoadId) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
{
    let load = unwind_safe(|| shared.invoke_loader());

    tokio::spawn(async move {
        trace!(load = %id, "awaiting loader");
        let outcome = load.await;
        shared.settle(id, outcome);
    })
}

/// Calls `invoke` and returns its future with every panic, in the call or
/// while polling, turned into an error.
pub(crate) fn unwind_safe<T, F>(invoke: F) -> BoxFuture<'static, anyhow::Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> BoxFuture<'static, anyhow::Result<T>>,
{
    match panic::catch_unwind(AssertUnwindSafe(invoke)) {
        Ok(load) => AssertUnwindSafe(load)
            .catch_unwind()
            .map(|caught| caught.unwrap_or_else(|payload| Err(panicked(payload))))
            .boxed(),
        Err(payload) => future::ready(Err(panicked(payload))).boxed(),
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    warn!(%detail, "loader panicked");
    anyhow!("loader panicked: {detail}")
}
