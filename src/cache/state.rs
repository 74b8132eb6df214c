//! Cache State Module
//!
//! Lifecycle of one cached value: idle, pending, fulfilled or rejected.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::CacheError;

// == Load Id ==
/// Token naming one in-flight load.
///
/// Ids are unique within the process, so a load can recognise its own
/// pending state even when several memos or batches write the same store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadId(u64);

impl LoadId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        LoadId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// == Cache State ==
/// The state of a single cached value. Exactly one variant is active.
#[derive(Debug)]
pub enum CacheState<T> {
    /// Nothing loaded and no load attempted (or reset)
    Idle,
    /// A load is in flight; only the load holding this id may settle it
    Pending(LoadId),
    /// The last load succeeded, or a value was set manually
    Fulfilled(Arc<T>),
    /// The last load failed
    Rejected(CacheError),
}

impl<T> Clone for CacheState<T> {
    fn clone(&self) -> Self {
        match self {
            CacheState::Idle => CacheState::Idle,
            CacheState::Pending(id) => CacheState::Pending(*id),
            CacheState::Fulfilled(value) => CacheState::Fulfilled(Arc::clone(value)),
            CacheState::Rejected(err) => CacheState::Rejected(err.clone()),
        }
    }
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        CacheState::Idle
    }
}

impl<T> CacheState<T> {
    // == Constructors ==
    /// A pending state under a fresh load id.
    pub fn pending() -> Self {
        CacheState::Pending(LoadId::next())
    }

    /// A fulfilled state holding `value`.
    pub fn fulfilled(value: T) -> Self {
        CacheState::Fulfilled(Arc::new(value))
    }

    /// A rejected state holding `err`.
    pub fn rejected(err: impl Into<CacheError>) -> Self {
        CacheState::Rejected(err.into())
    }

    // == Inspection ==
    pub fn status(&self) -> CacheStatus {
        match self {
            CacheState::Idle => CacheStatus::Idle,
            CacheState::Pending(_) => CacheStatus::Pending,
            CacheState::Fulfilled(_) => CacheStatus::Fulfilled,
            CacheState::Rejected(_) => CacheStatus::Rejected,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CacheState::Idle)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CacheState::Pending(_))
    }

    /// True if a load is in flight under `id`.
    pub fn is_pending_for(&self, id: LoadId) -> bool {
        matches!(self, CacheState::Pending(current) if *current == id)
    }

    /// Id of the in-flight load, if pending.
    pub fn load_id(&self) -> Option<LoadId> {
        match self {
            CacheState::Pending(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, CacheState::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, CacheState::Rejected(_))
    }

    /// True once a load has an outcome (fulfilled or rejected).
    pub fn is_settled(&self) -> bool {
        self.is_fulfilled() || self.is_rejected()
    }

    /// The cached value, if fulfilled.
    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            CacheState::Fulfilled(value) => Some(value),
            _ => None,
        }
    }

    /// The stored error, if rejected.
    pub fn error(&self) -> Option<&CacheError> {
        match self {
            CacheState::Rejected(err) => Some(err),
            _ => None,
        }
    }

    /// Identity comparison.
    ///
    /// Fulfilled states are the same only if they hold the very same
    /// allocation, so a reload that produces an equal value still counts as
    /// a new state.
    pub fn same(&self, other: &CacheState<T>) -> bool {
        match (self, other) {
            (CacheState::Idle, CacheState::Idle) => true,
            (CacheState::Pending(a), CacheState::Pending(b)) => a == b,
            (CacheState::Fulfilled(a), CacheState::Fulfilled(b)) => Arc::ptr_eq(a, b),
            (CacheState::Rejected(a), CacheState::Rejected(b)) => a.same(b),
            _ => false,
        }
    }
}

// == Cache Status ==
/// Payload-free tag of a `CacheState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Idle,
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Idle => write!(f, "idle"),
            CacheStatus::Pending => write!(f, "pending"),
            CacheStatus::Fulfilled => write!(f, "fulfilled"),
            CacheStatus::Rejected => write!(f, "rejected"),
        }
    }
}
