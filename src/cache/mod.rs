//! Cache Module
//!
//! Async memoization over reactive stores: `Memo` caches one loaded value,
//! `KeyCache` keeps one memo per key and batch-loads missing keys.

mod key;
mod loader;
mod memo;
mod state;
mod stats;


// Re-export public types
pub use key::{KeyAtom, KeyCache, StateMap};
pub use loader::{BatchLoader, DataLoader, DefaultBatchLoader};
pub use memo::{Memo, Subscription};
pub use state::{CacheState, CacheStatus, LoadId};
pub use stats::{BatchStats, BatchStatsSnapshot, LoadStats, LoadStatsSnapshot};

pub(crate) use key::BatchJob;
pub(crate) use memo::MemoShared;
