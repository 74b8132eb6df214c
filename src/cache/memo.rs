//! Memo Module
//!
//! A single-value async cache. Holds the outcome of a zero-argument loader
//! in a reactive store, loads at most once per idle period however many
//! callers ask, and reloads lazily while someone is subscribed.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, trace};

use crate::atom::{Atom, ReactiveStore};
use crate::cache::loader::LoadFn;
use crate::cache::{CacheState, LoadId, LoadStats, LoadStatsSnapshot};
use crate::config::{CacheConfig, ForcePolicy};
use crate::error::{CacheError, Result};
use crate::tasks::spawn_load;

// == Shared State ==
/// State shared by every clone of a `Memo`, its subscriptions and its
/// in-flight load tasks.
pub(crate) struct MemoShared<T> {
    store: Arc<dyn ReactiveStore<CacheState<T>>>,
    loader: LoadFn<T>,
    /// Set once a rejection has been delivered to a subscription stream;
    /// cleared when the next load starts.
    retry_latch: AtomicBool,
    subscribers: AtomicUsize,
    stats: LoadStats,
    config: CacheConfig,
}

impl<T> MemoShared<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn invoke_loader(&self) -> BoxFuture<'static, anyhow::Result<T>> {
        (self.loader)()
    }

    /// Claims the idle to pending transition. Returns the id of the new
    /// load if this call won it.
    fn begin_load(&self) -> Option<LoadId> {
        let mut claimed = None;
        self.store.modify(&mut |state| {
            if !state.is_idle() {
                return false;
            }
            let id = LoadId::next();
            *state = CacheState::Pending(id);
            claimed = Some(id);
            true
        });
        claimed
    }

    /// Starts a load if the store is idle; otherwise does nothing.
    fn start_load(self: &Arc<Self>) {
        let Some(id) = self.begin_load() else {
            return;
        };
        self.retry_latch.store(false, Ordering::SeqCst);
        self.stats.record_load_started();
        debug!(load = %id, "starting load");
        spawn_load(Arc::clone(self), id);
    }

    /// Writes a loader outcome, unless the store no longer waits on this
    /// load: any write since `begin_load`, from this memo or another writer
    /// of the same store, supersedes it.
    pub(crate) fn settle(&self, id: LoadId, outcome: anyhow::Result<T>) {
        let fulfilled = outcome.is_ok();
        let mut next = Some(match outcome {
            Ok(value) => CacheState::fulfilled(value),
            Err(err) => CacheState::rejected(err),
        });

        let applied = self.store.modify(&mut |state| {
            if !state.is_pending_for(id) {
                return false;
            }
            match next.take() {
                Some(next) => {
                    *state = next;
                    true
                }
                None => false,
            }
        });

        if applied {
            self.stats.record_settled(fulfilled);
            debug!(load = %id, fulfilled, "load settled");
        } else {
            self.stats.record_stale();
            debug!(load = %id, "discarding stale settlement");
        }
    }

    /// Unconditionally returns to idle, orphaning any in-flight load.
    fn reset(&self) {
        self.store.set(CacheState::Idle);
    }

    /// Returns a rejection to idle if it was already delivered to a
    /// subscriber, so the next observer retries instead of failing again.
    fn retry_if_signaled(&self) -> bool {
        if !self.retry_latch.load(Ordering::SeqCst) {
            return false;
        }
        let retried = self.store.modify(&mut |state| {
            if !state.is_rejected() {
                return false;
            }
            *state = CacheState::Idle;
            true
        });
        if retried {
            trace!("retrying a rejection already delivered to subscribers");
        }
        retried
    }

    fn has_subscribers(&self) -> bool {
        self.subscribers.load(Ordering::SeqCst) > 0
    }

    /// Resolves with the next settled outcome, loading if idle.
    async fn wait(self: &Arc<Self>) -> Result<Arc<T>> {
        match self.store.get() {
            CacheState::Fulfilled(value) => {
                self.stats.record_hit();
                return Ok(value);
            }
            CacheState::Rejected(err) => return Err(err),
            CacheState::Idle | CacheState::Pending(_) => {}
        }

        let mut changes = self.store.subscribe();
        while let Some(state) = changes.next().await {
            match state {
                // Reset while we were waiting: start over rather than hang
                CacheState::Idle => self.start_load(),
                CacheState::Pending(_) => {}
                CacheState::Fulfilled(value) => return Ok(value),
                CacheState::Rejected(err) => return Err(err),
            }
        }
        Err(CacheError::Closed)
    }
}

// == Memo ==
/// A memoized async value.
///
/// Cloning is cheap; clones share the store, the loader and all
/// bookkeeping. Loads are spawned on the Tokio runtime, so operations that
/// may start a load (`get`, `force_get`, `subscribe`, and `clear` while
/// subscribed) must run inside one.
pub struct Memo<T> {
    shared: Arc<MemoShared<T>>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Memo<T>
where
    T: Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates a memo over an injected store.
    ///
    /// # Arguments
    /// * `store` - where the cache state lives; may be shared or derived
    /// * `loader` - produces the value; called once per idle to pending transition
    pub fn new<S, F, Fut>(store: S, loader: F) -> Self
    where
        S: ReactiveStore<CacheState<T>> + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::with_config(store, loader, CacheConfig::default())
    }

    /// Creates a memo over an injected store with explicit configuration.
    pub fn with_config<S, F, Fut>(store: S, loader: F, config: CacheConfig) -> Self
    where
        S: ReactiveStore<CacheState<T>> + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let loader: LoadFn<T> = Arc::new(move || loader().boxed());
        Self {
            shared: Arc::new(MemoShared {
                store: Arc::new(store),
                loader,
                retry_latch: AtomicBool::new(false),
                subscribers: AtomicUsize::new(0),
                stats: LoadStats::new(),
                config,
            }),
        }
    }

    /// Creates a memo that owns a fresh idle `Atom`.
    pub fn from_loader<F, Fut>(loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(Atom::new(CacheState::Idle), loader)
    }

    // == Get ==
    /// Returns the cached value, loading it first if needed.
    ///
    /// Idle starts a load and waits; pending waits for the load in flight;
    /// fulfilled returns at once; rejected fails at once with the stored
    /// error, unless that rejection was already delivered to a subscriber,
    /// in which case the value is reloaded.
    pub async fn get(&self) -> Result<Arc<T>> {
        self.shared.retry_if_signaled();
        self.shared.wait().await
    }

    /// Discards the cached outcome and loads again.
    ///
    /// While a load is pending, `ForcePolicy::Join` waits for it and
    /// `ForcePolicy::Restart` abandons it for a new one.
    pub async fn force_get(&self) -> Result<Arc<T>> {
        let join = self.shared.config.force_policy == ForcePolicy::Join
            && self.shared.store.get().is_pending();
        if !join {
            self.clear();
        }
        self.shared.wait().await
    }

    // == Set ==
    /// Overwrites the state with `value` without calling the loader.
    pub fn set(&self, value: T) {
        self.shared.store.set(CacheState::fulfilled(value));
    }

    // == Modify ==
    /// Replaces a fulfilled value with `f(value)`. No-op in any other state.
    pub fn modify_if_fulfilled<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let mut f = Some(f);
        self.shared.store.modify(&mut |state| match state {
            CacheState::Fulfilled(value) => match f.take() {
                Some(f) => {
                    let next = f(value.as_ref());
                    *value = Arc::new(next);
                    true
                }
                None => false,
            },
            _ => false,
        });
    }

    // == Clear ==
    /// Resets to idle. With active subscribers a new load starts at once.
    pub fn clear(&self) {
        self.shared.reset();
        if self.shared.has_subscribers() {
            self.shared.start_load();
        }
    }

    // == Subscribe ==
    /// Subscribes to the value stream.
    ///
    /// Subscribing is what drives lazy loading: an idle memo starts loading
    /// here, and a rejection already delivered to an earlier subscriber is
    /// retried. The stream yields every fulfilled value, stays silent while
    /// idle or pending, and ends after yielding one error.
    pub fn subscribe(&self) -> Subscription<T> {
        let shared = Arc::clone(&self.shared);
        let changes = shared.store.subscribe();
        shared.subscribers.fetch_add(1, Ordering::SeqCst);
        let guard = SubscriberGuard { shared };

        guard.shared.retry_if_signaled();
        guard.shared.start_load();

        let feed = Feed {
            guard,
            changes,
            last: None,
            done: false,
        };
        Subscription {
            events: stream::unfold(feed, next_event::<T>).boxed(),
        }
    }

    // == Accessors ==
    /// Current state.
    pub fn state(&self) -> CacheState<T> {
        self.shared.store.get()
    }

    /// The underlying store.
    pub fn atom(&self) -> Arc<dyn ReactiveStore<CacheState<T>>> {
        Arc::clone(&self.shared.store)
    }

    pub fn stats(&self) -> LoadStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> CacheConfig {
        self.shared.config
    }

    /// True if both handles refer to the same memo.
    pub fn ptr_eq(&self, other: &Memo<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T> fmt::Debug for Memo<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("status", &self.state().status())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// == Subscription ==
/// Live stream of a memo's fulfilled values.
///
/// Items are `Ok(value)` for each new fulfilled state and at most one
/// `Err`, after which the stream ends. Dropping it unsubscribes.
pub struct Subscription<T> {
    events: BoxStream<'static, Result<Arc<T>>>,
}

impl<T> Stream for Subscription<T> {
    type Item = Result<Arc<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

struct SubscriberGuard<T> {
    shared: Arc<MemoShared<T>>,
}

impl<T> Drop for SubscriberGuard<T> {
    fn drop(&mut self) {
        self.shared.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Feed<T> {
    guard: SubscriberGuard<T>,
    changes: BoxStream<'static, CacheState<T>>,
    /// Last fulfilled state yielded, to skip re-notifications of it
    last: Option<CacheState<T>>,
    done: bool,
}

async fn next_event<T>(mut feed: Feed<T>) -> Option<(Result<Arc<T>>, Feed<T>)>
where
    T: Send + Sync + 'static,
{
    if feed.done {
        return None;
    }
    loop {
        let state = feed.changes.next().await?;
        if state.is_fulfilled() && feed.last.as_ref().is_some_and(|last| last.same(&state)) {
            continue;
        }
        match state {
            CacheState::Idle => feed.guard.shared.start_load(),
            CacheState::Pending(_) => {}
            CacheState::Fulfilled(value) => {
                feed.last = Some(CacheState::Fulfilled(Arc::clone(&value)));
                return Some((Ok(value), feed));
            }
            CacheState::Rejected(err) => {
                feed.guard.shared.retry_latch.store(true, Ordering::SeqCst);
                feed.done = true;
                return Some((Err(err), feed));
            }
        }
    }
}
