//! Reactive Store Module
//!
//! The narrow container contract the caches are built on: atomic
//! read/write/modify of a value plus a stream of changes. `Atom` is the
//! owned implementation; `LensAtom` projects a part of a larger state so it
//! can be read, written and observed on its own.

mod cell;
mod lens;

use std::sync::Arc;

use futures_util::stream::BoxStream;

pub use cell::Atom;
pub use lens::{by_key, by_key_with_default, Lens, LensAtom};

// == Reactive Store ==
/// An atomic container of a state value with change notification.
///
/// Implementations must run `modify` as a single critical section: no
/// reader observes a half-applied update and no other writer interleaves.
/// Closures passed to `modify` and `inspect` must not call back into the
/// same store.
pub trait ReactiveStore<S>: Send + Sync {
    /// Returns a copy of the current state.
    fn get(&self) -> S;

    /// Replaces the state and notifies observers.
    fn set(&self, value: S);

    /// Atomic read-modify-write.
    ///
    /// The closure edits the state in place and returns whether it changed
    /// anything. Observers are notified only when it returns `true`; the
    /// same flag is returned to the caller.
    fn modify(&self, f: &mut dyn FnMut(&mut S) -> bool) -> bool;

    /// Runs `f` against a borrowed view of the current state.
    fn inspect(&self, f: &mut dyn FnMut(&S));

    /// Stream of states: the current one first, then one item per change.
    ///
    /// Rapid successive changes may be coalesced into the latest state.
    /// The stream ends once the store is dropped.
    fn subscribe(&self) -> BoxStream<'static, S>;

    /// Like `subscribe`, but yields a unit per change without copying the
    /// state. Derived stores read only their part on each item.
    fn changes(&self) -> BoxStream<'static, ()>;
}

impl<S, R> ReactiveStore<S> for Arc<R>
where
    R: ReactiveStore<S> + ?Sized,
{
    fn get(&self) -> S {
        (**self).get()
    }

    fn set(&self, value: S) {
        (**self).set(value)
    }

    fn modify(&self, f: &mut dyn FnMut(&mut S) -> bool) -> bool {
        (**self).modify(f)
    }

    fn inspect(&self, f: &mut dyn FnMut(&S)) {
        (**self).inspect(f)
    }

    fn subscribe(&self) -> BoxStream<'static, S> {
        (**self).subscribe()
    }

    fn changes(&self) -> BoxStream<'static, ()> {
        (**self).changes()
    }
}
