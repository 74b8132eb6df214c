//! Key Cache Module
//!
//! A keyed collection of memos over one shared map of states. Each key gets
//! its own `Memo` on first use, backed by a lens view into the shared map,
//! and `get_map` fetches every not-yet-loaded key in a single batch call.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::atom::{by_key_with_default, LensAtom, ReactiveStore};
use crate::cache::loader::{BatchLoader, DataLoader, DefaultBatchLoader};
use crate::cache::{BatchStats, BatchStatsSnapshot, CacheState, LoadId, Memo};
use crate::config::{CacheConfig, MissingKeyPolicy};
use crate::error::{CacheError, Result};
use crate::tasks::spawn_batch;

/// Shared map of per-key states.
pub type StateMap<K, V> = HashMap<K, CacheState<V>>;

/// Per-key view into a `StateMap`.
pub type KeyAtom<K, V> = LensAtom<StateMap<K, V>, CacheState<V>>;

// == Key Cache ==
/// Lazily created, memoized per-key caches with batch loading.
///
/// Keys are compared by value (`Eq + Hash`), so composite keys such as
/// tuples or structs address the same entry whenever they are equal.
pub struct KeyCache<K, V> {
    map: Arc<dyn ReactiveStore<StateMap<K, V>>>,
    loader: Arc<dyn DataLoader<K, V>>,
    batch_loader: Arc<dyn BatchLoader<K, V>>,
    /// One memo per key ever requested; never evicted
    singles: Mutex<HashMap<K, Memo<V>>>,
    stats: Arc<BatchStats>,
    config: CacheConfig,
}

impl<K, V> KeyCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a key cache whose batch path runs `loader` once per key.
    ///
    /// # Arguments
    /// * `map` - store holding every key's state; may be shared
    /// * `loader` - loads one key
    pub fn new<S, L>(map: S, loader: L) -> Self
    where
        S: ReactiveStore<StateMap<K, V>> + 'static,
        L: DataLoader<K, V> + 'static,
    {
        let loader: Arc<dyn DataLoader<K, V>> = Arc::new(loader);
        Self {
            map: Arc::new(map),
            batch_loader: Arc::new(DefaultBatchLoader::new(Arc::clone(&loader))),
            loader,
            singles: Mutex::new(HashMap::new()),
            stats: Arc::new(BatchStats::new()),
            config: CacheConfig::default(),
        }
    }

    /// Replaces the batch loader used by `get_map`.
    pub fn with_batch_loader<B>(mut self, batch_loader: B) -> Self
    where
        B: BatchLoader<K, V> + 'static,
    {
        self.batch_loader = Arc::new(batch_loader);
        self
    }

    /// Replaces the configuration. Memos created afterwards inherit it.
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    // == Single ==
    /// Returns the memo for `key`, creating it on first request.
    pub fn single(&self, key: K) -> Memo<V> {
        let mut singles = self.singles.lock();
        singles
            .entry(key)
            .or_insert_with_key(|key| {
                let loader = Arc::clone(&self.loader);
                let load_key = key.clone();
                Memo::with_config(
                    self.get_atom(key.clone()),
                    move || loader.load(load_key.clone()),
                    self.config,
                )
            })
            .clone()
    }

    // == Get ==
    /// Returns the value for `key`, loading it if needed.
    pub async fn get(&self, key: &K) -> Result<Arc<V>> {
        self.single(key.clone()).get().await
    }

    /// Reloads the value for `key`.
    pub async fn force_get(&self, key: &K) -> Result<Arc<V>> {
        self.single(key.clone()).force_get().await
    }

    // == Set ==
    /// Stores `value` for `key` without calling any loader.
    pub fn set(&self, key: K, value: V) {
        let mut entry = Some((key, CacheState::fulfilled(value)));
        self.map.modify(&mut |map| match entry.take() {
            Some((key, state)) => {
                map.insert(key, state);
                true
            }
            None => false,
        });
    }

    // == Atom ==
    /// Derived view of one key's state. Reads an absent key as idle.
    pub fn get_atom(&self, key: K) -> KeyAtom<K, V> {
        LensAtom::new(
            Arc::clone(&self.map),
            by_key_with_default(key, CacheState::Idle),
        )
    }

    /// Current state of `key`.
    pub fn state(&self, key: &K) -> CacheState<V> {
        let mut state = CacheState::Idle;
        self.map.inspect(&mut |map| {
            if let Some(current) = map.get(key) {
                state = current.clone();
            }
        });
        state
    }

    // == Get Map ==
    /// Fetches many keys, batching every key that is not loaded yet.
    ///
    /// Keys that are absent or idle are marked pending in one update and
    /// handed to the batch loader in one call. Keys already pending or
    /// settled are not reloaded; their in-flight or stored outcome is used.
    /// Fails with the first error among the requested keys.
    ///
    /// The batch runs on its own task: dropping the returned future still
    /// lets the batch settle every key it marked pending.
    pub async fn get_map(&self, keys: &[K]) -> Result<HashMap<K, Arc<V>>> {
        if let Some(job) = self.mark_pending(keys) {
            self.stats.record_batch(job.keys.len());
            debug!(load = %job.id, keys = job.keys.len(), "batch loading missing keys");

            spawn_batch(job)
                .await
                .map_err(|err| CacheError::load(anyhow::Error::new(err)))??;
        }

        let values = future::try_join_all(keys.iter().map(|key| async move {
            self.get(key).await.map(|value| (key.clone(), value))
        }))
        .await?;
        Ok(values.into_iter().collect())
    }

    /// Batch loader counters. Per-key loads are counted by each key's memo.
    pub fn stats(&self) -> BatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of memos created so far.
    pub fn len(&self) -> usize {
        self.singles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.singles.lock().is_empty()
    }

    /// Marks every absent or idle key pending under one fresh load id, in
    /// one update. Returns the batch to run, or `None` if every key is
    /// already loaded or loading.
    fn mark_pending(&self, keys: &[K]) -> Option<BatchJob<K, V>> {
        let id = LoadId::next();
        let mut not_loaded = Vec::new();
        self.map.modify(&mut |map| {
            not_loaded.clear();
            let mut seen = HashSet::new();
            for key in keys {
                let idle = map.get(key).map_or(true, CacheState::is_idle);
                if idle && seen.insert(key) {
                    not_loaded.push(key.clone());
                }
            }
            for key in &not_loaded {
                map.insert(key.clone(), CacheState::Pending(id));
            }
            !not_loaded.is_empty()
        });

        if not_loaded.is_empty() {
            return None;
        }
        Some(BatchJob {
            map: Arc::clone(&self.map),
            batch_loader: Arc::clone(&self.batch_loader),
            stats: Arc::clone(&self.stats),
            policy: self.config.missing_key_policy,
            id,
            keys: not_loaded,
        })
    }
}

impl<K, V> fmt::Debug for KeyCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("singles", &self.singles.lock().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// == Batch Job ==
/// One batch load: the keys it marked pending under `id`, and what it needs
/// to settle them without the caller that started it.
pub(crate) struct BatchJob<K, V> {
    map: Arc<dyn ReactiveStore<StateMap<K, V>>>,
    batch_loader: Arc<dyn BatchLoader<K, V>>,
    stats: Arc<BatchStats>,
    policy: MissingKeyPolicy,
    pub(crate) id: LoadId,
    pub(crate) keys: Vec<K>,
}

impl<K, V> BatchJob<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn invoke(&self) -> BoxFuture<'static, anyhow::Result<Vec<(K, V)>>> {
        self.batch_loader.load_many(self.keys.clone())
    }

    /// Writes the batch outcome into the keys still pending under this
    /// batch's id. Fails only under `MissingKeyPolicy::FailBatch`.
    pub(crate) fn settle(&self, outcome: anyhow::Result<Vec<(K, V)>>) -> Result<()> {
        match outcome {
            Ok(pairs) => self.merge(pairs),
            Err(err) => {
                self.stats.record_failed();
                warn!(load = %self.id, keys = self.keys.len(), error = %err, "batch load failed");
                self.reject(CacheError::load(err));
                Ok(())
            }
        }
    }

    /// Writes returned pairs and deals with requested keys the batch left
    /// out. Keys another writer has touched since are skipped.
    fn merge(&self, pairs: Vec<(K, V)>) -> Result<()> {
        let id = self.id;
        let policy = self.policy;
        let mut pairs = Some(pairs);
        let mut missing = Vec::new();
        let mut stale = 0;

        self.map.modify(&mut |map| {
            let Some(pairs) = pairs.take() else {
                return false;
            };
            let mut returned = HashSet::with_capacity(pairs.len());
            for (key, value) in pairs {
                match map.get_mut(&key) {
                    Some(state) if state.is_pending_for(id) => {
                        *state = CacheState::fulfilled(value);
                    }
                    _ if self.keys.contains(&key) => stale += 1,
                    _ => {}
                }
                returned.insert(key);
            }

            for key in self.keys.iter().filter(|key| !returned.contains(*key)) {
                if let Some(state) = map.get_mut(key) {
                    if state.is_pending_for(id) {
                        *state = match policy {
                            MissingKeyPolicy::Reject => {
                                CacheState::Rejected(missing_from_batch(key))
                            }
                            MissingKeyPolicy::FailBatch => CacheState::Idle,
                        };
                    }
                }
                missing.push(key.clone());
            }
            true
        });

        if stale > 0 {
            self.stats.record_stale(stale);
            debug!(load = %id, stale, "batch skipped keys replaced while loading");
        }
        if missing.is_empty() {
            return Ok(());
        }

        self.stats.record_missing(missing.len());
        warn!(load = %id, missing = ?missing, "batch loader left keys out");
        match policy {
            MissingKeyPolicy::Reject => Ok(()),
            MissingKeyPolicy::FailBatch => Err(missing_from_batch(&missing[0])),
        }
    }

    /// Rejects every key still pending under this batch with `err`.
    fn reject(&self, err: CacheError) {
        let id = self.id;
        self.map.modify(&mut |map| {
            let mut changed = false;
            for key in &self.keys {
                if let Some(state) = map.get_mut(key) {
                    if state.is_pending_for(id) {
                        *state = CacheState::Rejected(err.clone());
                        changed = true;
                    }
                }
            }
            changed
        });
    }
}

fn missing_from_batch<K: fmt::Debug>(key: &K) -> CacheError {
    CacheError::MissingFromBatch {
        key: format!("{key:?}"),
    }
}
