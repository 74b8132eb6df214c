//! Atom
//!
//! Owned reactive store backed by a `tokio::sync::watch` channel.

use std::fmt;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

use super::ReactiveStore;

// == Atom ==
/// A shared, observable cell.
///
/// Clones share the same state. Writes take the channel's write lock for
/// the duration of the update, which is what makes `modify` atomic.
pub struct Atom<S> {
    tx: Arc<watch::Sender<S>>,
}

impl<S> Clone for Atom<S> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Atom<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("value", &*self.tx.borrow())
            .field("observers", &self.tx.receiver_count())
            .finish()
    }
}

impl<S> Atom<S>
where
    S: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a new atom holding `initial`.
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Number of live change streams.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<S: Default + Clone + Send + Sync + 'static> Default for Atom<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S> ReactiveStore<S> for Atom<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn get(&self) -> S {
        self.tx.borrow().clone()
    }

    fn set(&self, value: S) {
        self.tx.send_replace(value);
    }

    fn modify(&self, f: &mut dyn FnMut(&mut S) -> bool) -> bool {
        self.tx.send_if_modified(|state| f(state))
    }

    fn inspect(&self, f: &mut dyn FnMut(&S)) {
        f(&self.tx.borrow())
    }

    fn subscribe(&self) -> BoxStream<'static, S> {
        let rx = self.tx.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let state = rx.borrow_and_update().clone();
            Some((state, (rx, false)))
        })
        .boxed()
    }

    fn changes(&self) -> BoxStream<'static, ()> {
        let rx = self.tx.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            drop(rx.borrow_and_update());
            Some(((), (rx, false)))
        })
        .boxed()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom_get_set() {
        let atom = Atom::new(1);
        assert_eq!(atom.get(), 1);

        atom.set(2);
        assert_eq!(atom.get(), 2);
    }

    #[test]
    fn test_atom_clones_share_state() {
        let atom = Atom::new(String::from("a"));
        let other = atom.clone();

        other.set("b".to_string());
        assert_eq!(atom.get(), "b");
    }

    #[test]
    fn test_atom_modify_reports_change() {
        let atom = Atom::new(10);

        assert!(atom.modify(&mut |v| {
            *v += 1;
            true
        }));
        assert!(!atom.modify(&mut |_| false));
        assert_eq!(atom.get(), 11);
    }

    #[test]
    fn test_atom_inspect_borrows() {
        let atom = Atom::new(vec![1, 2, 3]);
        let mut len = 0;
        atom.inspect(&mut |v| len = v.len());
        assert_eq!(len, 3);
    }

    #[tokio::test]
    async fn test_atom_subscribe_yields_current_then_changes() {
        let atom = Atom::new(0);
        let mut changes = atom.subscribe();

        assert_eq!(changes.next().await, Some(0));

        atom.set(5);
        assert_eq!(changes.next().await, Some(5));
    }

    #[tokio::test]
    async fn test_atom_unchanged_modify_does_not_notify() {
        let atom = Atom::new(0);
        let mut changes = atom.subscribe();
        assert_eq!(changes.next().await, Some(0));

        atom.modify(&mut |_| false);
        atom.set(1);
        // The silent modify produced no item of its own
        assert_eq!(changes.next().await, Some(1));
    }

    #[tokio::test]
    async fn test_atom_changes_signal_without_state() {
        let atom = Atom::new(vec![0u8; 4]);
        let mut changes = atom.changes();

        assert_eq!(changes.next().await, Some(()));
        atom.set(vec![1]);
        assert_eq!(changes.next().await, Some(()));
        drop(atom);
        assert_eq!(changes.next().await, None);
    }

    #[tokio::test]
    async fn test_atom_stream_ends_when_dropped() {
        let atom = Atom::new(0);
        let mut changes = atom.subscribe();
        assert_eq!(atom.observer_count(), 1);

        assert_eq!(changes.next().await, Some(0));
        drop(atom);
        assert_eq!(changes.next().await, None);
    }
}
