//! Memo Cache - async memoization with reactive re-synchronization
//!
//! Caches the outcome of slow, fallible loads, shares one in-flight load
//! among every caller, and reloads lazily while observers are subscribed.
//! `KeyCache` extends this to keyed values with batch loading.

pub mod atom;
pub mod cache;
pub mod config;
pub mod error;

mod tasks;

pub use atom::{Atom, Lens, LensAtom, ReactiveStore};
pub use cache::{
    BatchLoader, BatchStatsSnapshot, CacheState, CacheStatus, DataLoader, KeyCache, LoadId,
    LoadStatsSnapshot, Memo, Subscription,
};
pub use config::{CacheConfig, ForcePolicy, MissingKeyPolicy};
pub use error::{CacheError, Result};
