//! Loader Module
//!
//! Contracts for fetching values: a per-key `DataLoader` and a
//! `BatchLoader` that fetches many keys in one call. Both are implemented
//! for plain async closures.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};

/// Zero-argument loader held by a `Memo`.
pub(crate) type LoadFn<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

// == Data Loader ==
/// Loads the value for one key.
pub trait DataLoader<K, V>: Send + Sync {
    fn load(&self, key: K) -> BoxFuture<'static, anyhow::Result<V>>;
}

impl<K, V, F, Fut> DataLoader<K, V> for F
where
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    fn load(&self, key: K) -> BoxFuture<'static, anyhow::Result<V>> {
        self(key).boxed()
    }
}

// == Batch Loader ==
/// Loads many keys in one call.
///
/// May return fewer pairs than keys requested; what happens to the missing
/// keys is decided by `MissingKeyPolicy`.
pub trait BatchLoader<K, V>: Send + Sync {
    fn load_many(&self, keys: Vec<K>) -> BoxFuture<'static, anyhow::Result<Vec<(K, V)>>>;
}

impl<K, V, F, Fut> BatchLoader<K, V> for F
where
    F: Fn(Vec<K>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<(K, V)>>> + Send + 'static,
{
    fn load_many(&self, keys: Vec<K>) -> BoxFuture<'static, anyhow::Result<Vec<(K, V)>>> {
        self(keys).boxed()
    }
}

// == Default Batch Loader ==
/// Batch loader used when none is supplied: runs the per-key loader for
/// every key concurrently. One failing key fails the whole batch.
pub struct DefaultBatchLoader<K, V> {
    loader: Arc<dyn DataLoader<K, V>>,
}

impl<K, V> DefaultBatchLoader<K, V> {
    pub fn new(loader: Arc<dyn DataLoader<K, V>>) -> Self {
        Self { loader }
    }
}

impl<K, V> BatchLoader<K, V> for DefaultBatchLoader<K, V>
where
    K: Clone + Send + 'static,
    V: Send + 'static,
{
    fn load_many(&self, keys: Vec<K>) -> BoxFuture<'static, anyhow::Result<Vec<(K, V)>>> {
        let loads: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let load = self.loader.load(key.clone());
                async move { load.await.map(|value| (key, value)) }
            })
            .collect();
        future::try_join_all(loads).boxed()
    }
}
